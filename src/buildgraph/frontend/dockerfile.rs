//! A minimal Dockerfile-syntax frontend translating instructions into
//! [`GraphBuilder`] calls (§4.10).
//!
//! Supports the common instruction subset: `FROM`, `RUN`, `COPY`
//! (including `--from=`), `ENV`, `WORKDIR`, `USER`, `LABEL`, `EXPOSE`,
//! `ENTRYPOINT`, `CMD`, `ARG`. Instructions this frontend does not
//! recognize are rejected rather than silently ignored, since a
//! silently-dropped instruction would produce a graph that does not
//! match the Dockerfile a caller believes they submitted.

use crate::error::{Error, Result};

use super::super::ir::BuildGraph;
use super::builder::GraphBuilder;
use super::Finding;

/// Parse and translate Dockerfile source text into a validated
/// [`BuildGraph`].
pub struct DockerfileFrontend;

impl DockerfileFrontend {
    /// Translate `source` into a build graph, running the analyzer
    /// pipeline before returning.
    pub fn parse(source: &str) -> Result<(BuildGraph, Vec<Finding>)> {
        let lines = join_continuations(source);
        let mut builder = Some(GraphBuilder::new());
        let mut stage: Option<super::builder::StageBuilder> = None;
        let mut stage_count = 0usize;

        for raw_line in lines {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (instruction, rest) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| Error::invalid_argument(format!("malformed instruction: {line}")))?;
            let rest = rest.trim();

            match instruction.to_ascii_uppercase().as_str() {
                "FROM" => {
                    if let Some(sb) = stage.take() {
                        builder = Some(sb.done());
                    }
                    let (reference, name) = parse_from(rest)?;
                    stage_count += 1;
                    let mut sb = builder.take().unwrap().stage_from(reference);
                    if let Some(name) = name {
                        sb = sb.named(name);
                    } else {
                        sb = sb.named(format!("stage{stage_count}"));
                    }
                    stage = Some(sb);
                }
                "RUN" => {
                    let sb = stage
                        .take()
                        .ok_or_else(|| Error::invalid_argument("RUN before FROM"))?;
                    stage = Some(sb.run(shell_split(rest)));
                }
                "ENV" => {
                    let sb = stage
                        .take()
                        .ok_or_else(|| Error::invalid_argument("ENV before FROM"))?;
                    let (key, value) = rest
                        .split_once('=')
                        .or_else(|| rest.split_once(char::is_whitespace))
                        .ok_or_else(|| Error::invalid_argument(format!("malformed ENV: {rest}")))?;
                    stage = Some(sb.env(key.trim(), value.trim().trim_matches('"')));
                }
                "WORKDIR" => {
                    let sb = stage
                        .take()
                        .ok_or_else(|| Error::invalid_argument("WORKDIR before FROM"))?;
                    stage = Some(sb.workdir(rest));
                }
                "USER" => {
                    let sb = stage
                        .take()
                        .ok_or_else(|| Error::invalid_argument("USER before FROM"))?;
                    stage = Some(sb.user(rest));
                }
                "LABEL" => {
                    let sb = stage
                        .take()
                        .ok_or_else(|| Error::invalid_argument("LABEL before FROM"))?;
                    let (key, value) = rest
                        .split_once('=')
                        .ok_or_else(|| Error::invalid_argument(format!("malformed LABEL: {rest}")))?;
                    stage = Some(sb.label(
                        key.trim().trim_matches('"'),
                        value.trim().trim_matches('"'),
                    ));
                }
                "EXPOSE" => {
                    let sb = stage
                        .take()
                        .ok_or_else(|| Error::invalid_argument("EXPOSE before FROM"))?;
                    stage = Some(sb.expose(rest)?);
                }
                "ENTRYPOINT" => {
                    let sb = stage
                        .take()
                        .ok_or_else(|| Error::invalid_argument("ENTRYPOINT before FROM"))?;
                    stage = Some(sb.entrypoint(parse_argv(rest)?));
                }
                "CMD" => {
                    let sb = stage
                        .take()
                        .ok_or_else(|| Error::invalid_argument("CMD before FROM"))?;
                    stage = Some(sb.cmd(parse_argv(rest)?));
                }
                "ARG" => {
                    let (name, default) = rest
                        .split_once('=')
                        .map(|(n, d)| (n, d.trim_matches('"')))
                        .unwrap_or((rest, ""));
                    if stage.is_some() {
                        return Err(Error::invalid_argument(
                            "ARG must appear before the first FROM it applies to",
                        ));
                    }
                    builder = Some(builder.take().unwrap().arg(name.trim(), default));
                }
                "COPY" => {
                    let sb = stage
                        .take()
                        .ok_or_else(|| Error::invalid_argument("COPY before FROM"))?;
                    stage = Some(parse_copy(sb, rest)?);
                }
                other => {
                    return Err(Error::invalid_argument(format!(
                        "unsupported Dockerfile instruction: {other}"
                    )));
                }
            }
        }

        let builder = match stage {
            Some(sb) => sb.done(),
            None => builder.unwrap(),
        };
        builder.build()
    }
}

fn join_continuations(source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for line in source.lines() {
        let trimmed = line.trim_end();
        if let Some(stripped) = trimmed.strip_suffix('\\') {
            current.push_str(stripped);
            current.push(' ');
        } else {
            current.push_str(trimmed);
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn parse_from(rest: &str) -> Result<(String, Option<String>)> {
    let mut parts = rest.split_whitespace();
    let reference = parts
        .next()
        .ok_or_else(|| Error::invalid_argument("FROM requires an image reference"))?
        .to_string();
    match parts.next() {
        Some("AS") | Some("as") => {
            let name = parts
                .next()
                .ok_or_else(|| Error::invalid_argument("FROM ... AS requires a stage name"))?;
            Ok((reference, Some(name.to_string())))
        }
        Some(other) => Err(Error::invalid_argument(format!(
            "unexpected token after FROM reference: {other}"
        ))),
        None => Ok((reference, None)),
    }
}

fn parse_copy(sb: super::builder::StageBuilder, rest: &str) -> Result<super::builder::StageBuilder> {
    let mut from_stage = None;
    let mut positional = Vec::new();
    for token in rest.split_whitespace() {
        if let Some(value) = token.strip_prefix("--from=") {
            from_stage = Some(value.to_string());
        } else {
            positional.push(token);
        }
    }
    if positional.len() != 2 {
        return Err(Error::invalid_argument(format!(
            "COPY requires exactly one source and one destination, got: {rest}"
        )));
    }
    let (source, destination) = (positional[0], positional[1]);
    Ok(match from_stage {
        Some(stage) => sb.copy_from_stage(stage, source, destination),
        None => sb.copy(source, destination),
    })
}

fn parse_argv(rest: &str) -> Result<Vec<String>> {
    let trimmed = rest.trim();
    if trimmed.starts_with('[') {
        let inner = trimmed
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| Error::invalid_argument(format!("malformed JSON argv: {rest}")))?;
        Ok(inner
            .split(',')
            .map(|s| s.trim().trim_matches('"').to_string())
            .filter(|s| !s.is_empty())
            .collect())
    } else {
        Ok(shell_split(trimmed))
    }
}

fn shell_split(s: &str) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), s.to_string()]
}
