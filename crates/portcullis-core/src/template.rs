//! `${name}` template expansion against context variables.
//!
//! Step configuration may reference variables, e.g. a circuit tracker id of
//! `"orders-${tenant}"` or a backend list entry of `"${backends}"`. A
//! reference to a missing variable is an error, never an empty string.

use portcullis_contracts::error::{GatewayError, GatewayResult};

use crate::context::ExecutionContext;

const OPEN: &str = "${";
const CLOSE: char = '}';

/// Return true if `s` contains at least one `${...}` reference.
pub fn is_template(s: &str) -> bool {
    s.contains(OPEN)
}

/// Names referenced by `template`, in order of appearance.
pub fn references(template: &str) -> GatewayResult<Vec<&str>> {
    let mut names = Vec::new();
    for segment in parse(template)? {
        if let Segment::Reference(name) = segment {
            names.push(name);
        }
    }
    Ok(names)
}

/// Expand every reference in `template` to the variable's rendering.
/// Lists render comma-separated.
pub fn expand(template: &str, ctx: &ExecutionContext) -> GatewayResult<String> {
    let mut out = String::with_capacity(template.len());
    for segment in parse(template)? {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Reference(name) => {
                let value = ctx.get_variable(name).ok_or_else(|| GatewayError::Template {
                    template: template.to_string(),
                    reason: format!("no such variable '{}'", name),
                })?;
                out.push_str(&value.to_string());
            }
        }
    }
    Ok(out)
}

/// Expand `template` into zero or more values.
///
/// A template that is exactly one reference to a list variable yields one
/// item per element. Anything else yields the single expanded string.
/// Items that are blank after trimming are dropped.
pub fn expand_values(template: &str, ctx: &ExecutionContext) -> GatewayResult<Vec<String>> {
    let segments = parse(template)?;
    let items = match segments.as_slice() {
        [Segment::Reference(name)] => {
            let value = ctx.get_variable(name).ok_or_else(|| GatewayError::Template {
                template: template.to_string(),
                reason: format!("no such variable '{}'", name),
            })?;
            value.to_strings()
        }
        _ => vec![expand(template, ctx)?],
    };
    Ok(items.into_iter().filter(|item| !item.trim().is_empty()).collect())
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Reference(&'a str),
}

fn parse(template: &str) -> GatewayResult<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find(OPEN) {
        if start > 0 {
            segments.push(Segment::Literal(&rest[..start]));
        }
        let after = &rest[start + OPEN.len()..];
        let end = after.find(CLOSE).ok_or_else(|| GatewayError::Template {
            template: template.to_string(),
            reason: "unterminated '${' reference".to_string(),
        })?;
        let name = after[..end].trim();
        if name.is_empty() {
            return Err(GatewayError::Template {
                template: template.to_string(),
                reason: "empty variable reference".to_string(),
            });
        }
        segments.push(Segment::Reference(name));
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    Ok(segments)
}
