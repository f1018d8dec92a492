use crate::command::{Command, MeasureKind};
use carto_geo::{DistanceUnit, Feature, JsonObject};
use once_cell::sync::Lazy;
use regex::Regex;

static NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_]+").unwrap_or_else(|e| unreachable!("directive name regex: {e}"))
});

/// A raw bracketed directive: the command name and its unparsed
/// argument string. Exposed for diagnostics; most callers want
/// [`parse_commands`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub args: String,
}

/// Extract every bracketed directive from `text`, left to right.
///
/// A directive opens with `[`, starts with a name of letters, digits and
/// underscores, and closes at the matching `]`. Brackets and braces
/// inside JSON arguments nest (string literals are honored), so feature
/// JSON containing `[` `]` stays within one directive. Spans that do not
/// have directive shape are skipped without consuming their content.
pub fn extract_directives(text: &str) -> Vec<Directive> {
    let mut out = Vec::new();
    let mut rest = text;
    let mut offset = 0usize;

    while let Some(open) = rest.find('[') {
        let body_start = offset + open + 1;
        let body = &text[body_start..];

        let Some(name_match) = NAME_RE.find(body) else {
            offset = body_start;
            rest = &text[offset..];
            continue;
        };
        let after_name = &body[name_match.end()..];

        // The name must be followed by whitespace or the closing bracket.
        let shape_ok = after_name
            .chars()
            .next()
            .map(|c| c.is_whitespace() || c == ']')
            .unwrap_or(false);
        if !shape_ok {
            offset = body_start;
            rest = &text[offset..];
            continue;
        }

        let Some(close_rel) = find_balanced_close(body) else {
            // Unterminated directive; nothing after this can close it.
            offset = body_start;
            rest = &text[offset..];
            continue;
        };

        let args = body[name_match.end()..close_rel].trim().to_string();
        out.push(Directive {
            name: name_match.as_str().to_string(),
            args,
        });

        offset = body_start + close_rel + 1;
        rest = &text[offset..];
    }
    out
}

/// Byte offset (into `body`) of the `]` closing the directive opened
/// just before `body`, honoring nested brackets/braces and JSON string
/// literals.
fn find_balanced_close(body: &str) -> Option<usize> {
    let mut depth = 1i32;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in body.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            '}' => depth -= 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split an argument string into positional tokens. Tokens separate on
/// spaces at nesting depth zero, so a JSON argument containing spaces
/// binds as a single token.
fn split_args(args: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for ch in args.chars() {
        if in_string {
            current.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                current.push(ch);
            }
            '{' | '[' => {
                depth += 1;
                current.push(ch);
            }
            '}' | ']' => {
                depth -= 1;
                current.push(ch);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Parse every recognizable command out of `text`, in order.
///
/// Unknown directive names and directives whose arguments fail JSON or
/// numeric parsing are dropped individually; this function never fails.
pub fn parse_commands(text: &str) -> Vec<Command> {
    extract_directives(text)
        .into_iter()
        .filter_map(|directive| {
            let command = bind_directive(&directive);
            if command.is_none() {
                log::debug!(
                    "dropping directive [{} {}]: unknown name or malformed arguments",
                    directive.name,
                    directive.args
                );
            }
            command
        })
        .collect()
}

fn bind_directive(directive: &Directive) -> Option<Command> {
    if !Command::is_known_name(&directive.name) {
        return None;
    }
    let args = split_args(&directive.args);
    match directive.name.as_str() {
        "zoom_to" => {
            let lat = parse_finite(args.first()?)?;
            let lng = parse_finite(args.get(1)?)?;
            let zoom = match args.get(2) {
                Some(raw) => Some(raw.parse::<u32>().ok()?),
                None => None,
            };
            Some(Command::ZoomTo {
                coordinates: [lat, lng],
                zoom,
            })
        }
        "add_feature" => {
            let feature: Feature = serde_json::from_str(args.first()?).ok()?;
            Some(Command::AddFeature {
                feature,
                layer_id: args.get(1).cloned(),
            })
        }
        "modify_feature" => {
            let feature_id = args.first()?.clone();
            let properties: JsonObject = serde_json::from_str(args.get(1)?).ok()?;
            Some(Command::ModifyFeature {
                feature_id,
                properties,
            })
        }
        "remove_feature" => Some(Command::RemoveFeature {
            feature_id: args.first()?.clone(),
            layer_id: args.get(1).cloned(),
        }),
        "style_feature" => {
            let feature_id = args.first()?.clone();
            let style: JsonObject = serde_json::from_str(args.get(1)?).ok()?;
            Some(Command::StyleFeature { feature_id, style })
        }
        "measure" => {
            let kind: MeasureKind = args.first()?.parse().ok()?;
            let mut features = Vec::with_capacity(args.len().saturating_sub(1));
            for raw in &args[1..] {
                features.push(serde_json::from_str::<Feature>(raw).ok()?);
            }
            (!features.is_empty()).then_some(Command::Measure { kind, features })
        }
        "buffer" => {
            let feature: Feature = serde_json::from_str(args.first()?).ok()?;
            let distance = parse_finite(args.get(1)?)?;
            let units: DistanceUnit = args.get(2)?.parse().ok()?;
            Some(Command::Buffer {
                feature,
                distance,
                units,
            })
        }
        _ => None,
    }
}

fn parse_finite(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}
