//! Typed system declaration tree and its line-based text reader.
//!
//! The declaration tree is the input boundary of the model: a front end (or
//! a test) builds a `SystemDecl` and hands it to [`crate::System::new`]. The
//! reader accepts a compact line format, one directive per line:
//!
//! ```text
//! system:train_gate
//! clock:x
//! int:c:0:3:0                # name:min:max:initial
//! param:k:2                  # name:value
//! event:approach
//! process:Gate
//! location:Gate:open{initial; labels: safe; invariant: x<=5}
//! edge:Gate:open:closed:approach{provided: x<5 && c==0; do: x=0, c=c+1}
//! sync:Train@approach:Gate@approach?
//! ```
//!
//! Location and edge attributes sit between braces, separated by `;`; an
//! attribute is a bare flag (`initial`, `urgent`, `committed`) or a
//! `key: value` pair (`labels`, `invariant`, `provided`, `do`). A `?` after
//! a sync endpoint marks weak participation. `#` starts a comment.

use thiserror::Error;

/// Declaration of a whole system.
#[derive(Debug, Clone, Default)]
pub struct SystemDecl {
    pub name: String,
    pub events: Vec<String>,
    pub clocks: Vec<String>,
    pub intvars: Vec<IntVarDecl>,
    pub params: Vec<ParamDecl>,
    pub processes: Vec<ProcessDecl>,
    pub syncs: Vec<SyncDecl>,
}

#[derive(Debug, Clone)]
pub struct IntVarDecl {
    pub name: String,
    pub min: i32,
    pub max: i32,
    pub initial: i32,
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: String,
    pub value: i32,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessDecl {
    pub name: String,
    pub locations: Vec<LocationDecl>,
    pub edges: Vec<EdgeDecl>,
}

#[derive(Debug, Clone, Default)]
pub struct LocationDecl {
    pub name: String,
    pub initial: bool,
    pub committed: bool,
    pub urgent: bool,
    pub labels: Vec<String>,
    pub invariant: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EdgeDecl {
    pub source: String,
    pub target: String,
    pub event: String,
    pub guard: Option<String>,
    pub statement: Option<String>,
}

/// One endpoint of a synchronization vector.
#[derive(Debug, Clone)]
pub struct SyncEndpointDecl {
    pub process: String,
    pub event: String,
    pub weak: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SyncDecl {
    pub endpoints: Vec<SyncEndpointDecl>,
}

/// Reader error, with the offending line number.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct DeclError {
    pub line: usize,
    pub message: String,
}

fn err(line: usize, message: impl Into<String>) -> DeclError {
    DeclError {
        line,
        message: message.into(),
    }
}

fn parse_i32(text: &str, line: usize, what: &str) -> Result<i32, DeclError> {
    text.trim()
        .parse()
        .map_err(|_| err(line, format!("invalid {}: '{}'", what, text.trim())))
}

/// Split a directive into its head fields and optional `{...}` attribute
/// body.
fn split_head_body(rest: &str, line: usize) -> Result<(Vec<&str>, Option<&str>), DeclError> {
    let (head, body) = match rest.find('{') {
        Some(open) => {
            let close = rest
                .rfind('}')
                .ok_or_else(|| err(line, "unterminated attribute block"))?;
            if close < open {
                return Err(err(line, "unterminated attribute block"));
            }
            (&rest[..open], Some(&rest[open + 1..close]))
        }
        None => (rest, None),
    };
    Ok((head.split(':').map(str::trim).collect(), body))
}

struct Attrs<'a> {
    flags: Vec<&'a str>,
    pairs: Vec<(&'a str, &'a str)>,
}

fn parse_attrs(body: &str) -> Attrs {
    let mut attrs = Attrs {
        flags: Vec::new(),
        pairs: Vec::new(),
    };
    for piece in body.split(';') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        match piece.find(':') {
            Some(colon) => attrs
                .pairs
                .push((piece[..colon].trim(), piece[colon + 1..].trim())),
            None => attrs.flags.push(piece),
        }
    }
    attrs
}

/// Parse a system declaration from its text form.
pub fn parse(text: &str) -> Result<SystemDecl, DeclError> {
    let mut decl = SystemDecl::default();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let content = match raw.find('#') {
            Some(hash) => &raw[..hash],
            None => raw,
        };
        let content = content.trim();
        if content.is_empty() {
            continue;
        }
        let (directive, rest) = content
            .split_once(':')
            .ok_or_else(|| err(line, "expected 'directive:...'"))?;
        match directive.trim() {
            "system" => decl.name = rest.trim().to_string(),
            "event" => decl.events.push(rest.trim().to_string()),
            "clock" => decl.clocks.push(rest.trim().to_string()),
            "int" => {
                let fields: Vec<&str> = rest.split(':').map(str::trim).collect();
                if fields.len() != 4 {
                    return Err(err(line, "expected 'int:name:min:max:initial'"));
                }
                decl.intvars.push(IntVarDecl {
                    name: fields[0].to_string(),
                    min: parse_i32(fields[1], line, "minimum")?,
                    max: parse_i32(fields[2], line, "maximum")?,
                    initial: parse_i32(fields[3], line, "initial value")?,
                });
            }
            "param" => {
                let fields: Vec<&str> = rest.split(':').map(str::trim).collect();
                if fields.len() != 2 {
                    return Err(err(line, "expected 'param:name:value'"));
                }
                decl.params.push(ParamDecl {
                    name: fields[0].to_string(),
                    value: parse_i32(fields[1], line, "parameter value")?,
                });
            }
            "process" => decl.processes.push(ProcessDecl {
                name: rest.trim().to_string(),
                ..ProcessDecl::default()
            }),
            "location" => {
                let (head, body) = split_head_body(rest, line)?;
                if head.len() != 2 {
                    return Err(err(line, "expected 'location:process:name{...}'"));
                }
                let process = find_process(&mut decl, head[0], line)?;
                let mut loc = LocationDecl {
                    name: head[1].to_string(),
                    ..LocationDecl::default()
                };
                if let Some(body) = body {
                    let attrs = parse_attrs(body);
                    for flag in attrs.flags {
                        match flag {
                            "initial" => loc.initial = true,
                            "committed" => loc.committed = true,
                            "urgent" => loc.urgent = true,
                            other => {
                                return Err(err(line, format!("unknown flag '{}'", other)))
                            }
                        }
                    }
                    for (key, value) in attrs.pairs {
                        match key {
                            "labels" => {
                                loc.labels = value
                                    .split(',')
                                    .map(|l| l.trim().to_string())
                                    .filter(|l| !l.is_empty())
                                    .collect()
                            }
                            "invariant" => loc.invariant = Some(value.to_string()),
                            other => {
                                return Err(err(
                                    line,
                                    format!("unknown location attribute '{}'", other),
                                ))
                            }
                        }
                    }
                }
                process.locations.push(loc);
            }
            "edge" => {
                let (head, body) = split_head_body(rest, line)?;
                if head.len() != 4 {
                    return Err(err(
                        line,
                        "expected 'edge:process:source:target:event{...}'",
                    ));
                }
                let process = find_process(&mut decl, head[0], line)?;
                let mut edge = EdgeDecl {
                    source: head[1].to_string(),
                    target: head[2].to_string(),
                    event: head[3].to_string(),
                    guard: None,
                    statement: None,
                };
                if let Some(body) = body {
                    let attrs = parse_attrs(body);
                    if let Some(flag) = attrs.flags.first() {
                        return Err(err(line, format!("unknown flag '{}'", flag)));
                    }
                    for (key, value) in attrs.pairs {
                        match key {
                            "provided" => edge.guard = Some(value.to_string()),
                            "do" => edge.statement = Some(value.to_string()),
                            other => {
                                return Err(err(
                                    line,
                                    format!("unknown edge attribute '{}'", other),
                                ))
                            }
                        }
                    }
                }
                process.edges.push(edge);
            }
            "sync" => {
                let mut sync = SyncDecl::default();
                for endpoint in rest.split(':') {
                    let endpoint = endpoint.trim();
                    let (endpoint, weak) = match endpoint.strip_suffix('?') {
                        Some(stripped) => (stripped, true),
                        None => (endpoint, false),
                    };
                    let (process, event) = endpoint.split_once('@').ok_or_else(|| {
                        err(line, format!("expected 'process@event', got '{}'", endpoint))
                    })?;
                    sync.endpoints.push(SyncEndpointDecl {
                        process: process.trim().to_string(),
                        event: event.trim().to_string(),
                        weak,
                    });
                }
                if sync.endpoints.len() < 2 {
                    return Err(err(line, "synchronization needs at least two endpoints"));
                }
                decl.syncs.push(sync);
            }
            other => return Err(err(line, format!("unknown directive '{}'", other))),
        }
    }
    Ok(decl)
}

fn find_process<'a>(
    decl: &'a mut SystemDecl,
    name: &str,
    line: usize,
) -> Result<&'a mut ProcessDecl, DeclError> {
    decl.processes
        .iter_mut()
        .find(|p| p.name == name)
        .ok_or_else(|| err(line, format!("process '{}' not declared", name)))
}
