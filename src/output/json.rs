use anyhow::Result;
use serde::Serialize;

pub fn render_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::render_json;
    use crate::store::Report;

    #[test]
    fn empty_report_serializes_with_null_date() {
        let rendered = render_json(&Report::default()).expect("json");
        let value: serde_json::Value = serde_json::from_str(&rendered).expect("parse");
        assert!(value["date"].is_null());
        assert_eq!(value["areas"], serde_json::json!([]));
        assert_eq!(value["total_available_slots_7d"], 0);
    }
}
