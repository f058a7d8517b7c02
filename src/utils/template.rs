//! `{name}` placeholder handling shared by endpoint templates, OAuth2 token
//! URLs and cache key templates.

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Names of every `{name}` placeholder, in template order, without duplicates.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let tail = &rest[start + 1..];
        let Some(end) = tail.find('}') else {
            break;
        };
        let name = &tail[..end];
        if is_placeholder_name(name) {
            if !out.iter().any(|existing| existing == name) {
                out.push(name.to_string());
            }
            rest = &tail[end + 1..];
        } else {
            rest = tail;
        }
    }
    out
}

/// Substitutes every placeholder with the value produced by `resolve`.
/// Returns the first placeholder name `resolve` could not satisfy.
/// Braces that do not form a placeholder are copied verbatim.
pub fn expand_placeholders<F>(template: &str, mut resolve: F) -> Result<String, String>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let (prefix, tail) = rest.split_at(start);
        out.push_str(prefix);
        let inner = &tail[1..];
        match inner.find('}') {
            Some(end) if is_placeholder_name(&inner[..end]) => {
                let name = &inner[..end];
                let value = resolve(name).ok_or_else(|| name.to_string())?;
                out.push_str(&value);
                rest = &inner[end + 1..];
            }
            _ => {
                out.push('{');
                rest = inner;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{expand_placeholders, placeholders};

    #[test]
    fn placeholders_are_collected_in_order() {
        assert_eq!(
            placeholders("/teams/{team_id}/members/{member_id}/{team_id}"),
            vec!["team_id".to_string(), "member_id".to_string()]
        );
        assert!(placeholders("/plain/path").is_empty());
    }

    #[test]
    fn expansion_substitutes_and_reports_missing() {
        let out = expand_placeholders("/people/{resource_id}", |name| {
            (name == "resource_id").then(|| "abc".to_string())
        });
        assert_eq!(out, Ok("/people/abc".to_string()));

        let missing = expand_placeholders("/people/{resource_id}", |_| None);
        assert_eq!(missing, Err("resource_id".to_string()));
    }

    #[test]
    fn non_placeholder_braces_are_literal() {
        let out = expand_placeholders("{\"a\": 1} {x}", |_| Some("y".to_string()));
        assert_eq!(out, Ok("{\"a\": 1} y".to_string()));
    }
}
