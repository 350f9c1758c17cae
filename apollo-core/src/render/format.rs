use std::collections::BTreeMap;

use apollo_sdk::objects::ConfigFileFormat;

use super::RenderError;

pub fn render_file(
    format: ConfigFileFormat,
    configurations: &BTreeMap<String, String>,
) -> Result<String, RenderError> {
    match format {
        ConfigFileFormat::Properties => Ok(to_properties(configurations)),
        ConfigFileFormat::Json => to_json(configurations),
    }
}

/// One `key=value` line per entry in key order, escaped the way
/// `java.util.Properties` writes them.
pub fn to_properties(configurations: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in configurations {
        escape_into(&mut out, key, true);
        out.push('=');
        escape_into(&mut out, value, false);
        out.push('\n');
    }
    out
}

pub fn to_json(configurations: &BTreeMap<String, String>) -> Result<String, RenderError> {
    serde_json::to_string(configurations).map_err(RenderError::Encode)
}

fn escape_into(out: &mut String, text: &str, is_key: bool) {
    for (i, ch) in text.chars().enumerate() {
        match ch {
            ' ' if i == 0 || is_key => out.push_str("\\ "),
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{000c}' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn properties_are_sorted_and_escaped() {
        let text = to_properties(&map(&[
            ("timeout", "5000"),
            ("db.url", "jdbc:mysql://h:3306/db"),
            ("a key", " lead\tand trail "),
            ("msg", "héllo#1"),
        ]));
        assert_eq!(
            text,
            "a\\ key=\\ lead\\tand trail \n\
             db.url=jdbc\\:mysql\\://h\\:3306/db\n\
             msg=héllo\\#1\n\
             timeout=5000\n"
        );
    }

    #[test]
    fn json_is_a_flat_sorted_object() {
        let json = to_json(&map(&[("b", "2"), ("a", "1")])).unwrap();
        assert_eq!(json, r#"{"a":"1","b":"2"}"#);
    }

    #[test]
    fn empty_map_renders_empty_properties() {
        assert_eq!(render_file(ConfigFileFormat::Properties, &BTreeMap::new()).unwrap(), "");
    }
}
