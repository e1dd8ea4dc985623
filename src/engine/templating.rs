use serde_json::Value;

/// `{{identifier}}` substitution where identifier matches `[A-Za-z0-9_\-]+`
/// (spec.md §9). Undefined names substitute the empty string.
pub fn templ_str(s: &str, ctx: &Value) -> String {
    let mut out = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        let (head, tail) = rest.split_at(start);
        out.push_str(head);
        if let Some(end_rel) = tail.find("}}") {
            let (expr_with, new_rest) = tail.split_at(end_rel + 2);
            let expr = expr_with
                .trim_start_matches("{{")
                .trim_end_matches("}}")
                .trim();
            let val = lookup_ctx(expr, ctx).unwrap_or_default();
            out.push_str(&val);
            rest = new_rest;
        } else {
            out.push_str(tail);
            rest = "";
            break;
        }
    }
    out.push_str(rest);
    out
}

pub fn lookup_ctx(path: &str, ctx: &Value) -> Option<String> {
    let mut cur = ctx;
    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        match cur {
            Value::Object(map) => {
                cur = map.get(part)?;
            }
            Value::Array(arr) => {
                let idx: usize = part.parse().ok()?;
                cur = arr.get(idx)?;
            }
            _ => {
                return Some(cur.to_string().trim_matches('"').to_string());
            }
        }
    }
    Some(match cur {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_nested_path() {
        let ctx = json!({"current_input": {"a": 5}, "b": {"c": "x"}});
        assert_eq!(templ_str("val={{current_input.a}}", &ctx), "val=5");
        assert_eq!(templ_str("{{b.c}}!", &ctx), "x!");
    }

    #[test]
    fn missing_name_becomes_empty_string() {
        let ctx = json!({});
        assert_eq!(templ_str("[{{missing}}]", &ctx), "[]");
    }

    #[test]
    fn unterminated_braces_are_passed_through() {
        let ctx = json!({});
        assert_eq!(templ_str("a {{ unterminated", &ctx), "a {{ unterminated");
    }
}
