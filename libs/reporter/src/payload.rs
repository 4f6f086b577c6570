use serde::{Deserialize, Serialize};

pub const SAMPLE_FIELD_STR: &str = "teststr";

/// Структурная запись внутри каждого статус-апдейта.
///
/// Для агрегатора это непрозрачный текст, читатель topic'а
/// декодирует его обратно в эту форму.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleStatus {
    pub sample_field_str: String,
    pub sample_field_int: i64,
}

impl SampleStatus {
    pub fn new(sample_counter: i64) -> Self {
        Self {
            sample_field_str: SAMPLE_FIELD_STR.to_string(),
            sample_field_int: sample_counter,
        }
    }

    /// JSON с отступами.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_object_with_two_fields() {
        let text = SampleStatus::new(7).to_payload().unwrap();
        assert!(text.contains('\n'));

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["sample_field_str"], "teststr");
        assert_eq!(obj["sample_field_int"], 7);
    }

    #[test]
    fn field_order_is_stable() {
        let text = SampleStatus::new(1).to_payload().unwrap();
        let str_at = text.find("sample_field_str").unwrap();
        let int_at = text.find("sample_field_int").unwrap();
        assert!(str_at < int_at);
    }
}
