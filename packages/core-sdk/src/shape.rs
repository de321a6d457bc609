use serde_json::Value;

use crate::error::ErrorKind;
use crate::models::{StructuredPromptDecomposition, VideoPromptVariation};

/** \brief 每次生成/描述调用固定返回的条目数。 */
pub const BATCH_SIZE: usize = 3;

/** \brief JSON 对象模式下模型常用的数组包装键。 */
const WRAPPER_KEYS: [&str; 5] = ["prompts", "variations", "captions", "items", "results"];

/**
 * \brief 取出期望的数组；兼容 `{"prompts": [...]}` 这类单层包装。
 */
fn unwrap_array(value: Value) -> Result<Vec<Value>, ErrorKind> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for key in WRAPPER_KEYS {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return Ok(items);
                }
            }
            let mut arrays = map.into_iter().filter_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            });
            match (arrays.next(), arrays.next()) {
                (Some(items), None) => Ok(items),
                _ => Err(ErrorKind::Shape("expected a JSON array".into())),
            }
        }
        other => Err(ErrorKind::Shape(format!(
            "expected a JSON array, got {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn non_empty_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/**
 * \brief 转换为恰好 3 个变体；不足 3 个或字段缺失均视为形状错误，多余条目丢弃。
 */
pub fn variations_from_value(value: Value) -> Result<Vec<VideoPromptVariation>, ErrorKind> {
    let items = unwrap_array(value)?;
    if items.len() < BATCH_SIZE {
        return Err(ErrorKind::Shape(format!(
            "expected {} prompt variations, got {}",
            BATCH_SIZE,
            items.len()
        )));
    }
    items
        .iter()
        .take(BATCH_SIZE)
        .enumerate()
        .map(|(idx, item)| {
            let title = non_empty_str(item, "title");
            let prompt = non_empty_str(item, "prompt");
            match (title, prompt) {
                (Some(title), Some(prompt)) => Ok(VideoPromptVariation {
                    title: title.to_string(),
                    prompt: prompt.to_string(),
                }),
                _ => Err(ErrorKind::Shape(format!(
                    "variation {} is missing a non-empty title or prompt",
                    idx
                ))),
            }
        })
        .collect()
}

pub fn captions_from_value(value: Value) -> Result<Vec<String>, ErrorKind> {
    let items = unwrap_array(value)?;
    if items.len() < BATCH_SIZE {
        return Err(ErrorKind::Shape(format!(
            "expected {} captions, got {}",
            BATCH_SIZE,
            items.len()
        )));
    }
    items
        .into_iter()
        .take(BATCH_SIZE)
        .enumerate()
        .map(|(idx, item)| match item {
            Value::String(s) if !s.trim().is_empty() => Ok(s),
            other => Err(ErrorKind::Shape(format!(
                "caption {} should be a non-empty string, got {}",
                idx,
                kind_of(&other)
            ))),
        })
        .collect()
}

pub fn decomposition_from_value(value: Value) -> Result<StructuredPromptDecomposition, ErrorKind> {
    if !value.is_object() {
        return Err(ErrorKind::Shape(format!(
            "expected a JSON object, got {}",
            kind_of(&value)
        )));
    }
    serde_json::from_value(value).map_err(|e| ErrorKind::Shape(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn three_variations() -> Value {
        json!([
            {"title": "Neon Rain", "prompt": "A robot walks through rain."},
            {"title": "Steel Puddles", "prompt": "Low angle on metal feet."},
            {"title": "Blue Hour", "prompt": "The camera cranes up."}
        ])
    }

    #[test]
    fn three_variations_convert() {
        let list = variations_from_value(three_variations()).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[2].title, "Blue Hour");
    }

    #[test]
    fn wrapped_array_is_accepted() {
        let list = variations_from_value(json!({ "prompts": three_variations() })).unwrap();
        assert_eq!(list.len(), 3);
        let list = variations_from_value(json!({ "output": three_variations() })).unwrap();
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn extra_variations_are_dropped() {
        let mut items = three_variations();
        items
            .as_array_mut()
            .unwrap()
            .push(json!({"title": "Fourth", "prompt": "Extra."}));
        assert_eq!(variations_from_value(items).unwrap().len(), 3);
    }

    #[test]
    fn short_or_incomplete_batches_are_rejected() {
        let err = variations_from_value(json!([{"title": "a", "prompt": "b"}])).unwrap_err();
        assert!(matches!(err, ErrorKind::Shape(_)));

        let err = variations_from_value(json!([
            {"title": "a", "prompt": "b"},
            {"title": "", "prompt": "b"},
            {"title": "c", "prompt": "d"}
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("variation 1"));
    }

    #[test]
    fn captions_must_be_strings() {
        let caps = captions_from_value(json!(["one", "two", "three"])).unwrap();
        assert_eq!(caps, vec!["one", "two", "three"]);
        assert!(captions_from_value(json!(["one", 2, "three"])).is_err());
        assert!(captions_from_value(json!("one")).is_err());
    }

    #[test]
    fn decomposition_requires_six_fields() {
        let value = json!({
            "scene_description": "Rainy alley",
            "visual_style": "Cyberpunk",
            "protagonist_action": "Walking",
            "camera_angle": "Low angle",
            "camera_movement": "Tracking",
            "lighting_details": "Neon"
        });
        let d = decomposition_from_value(value.clone()).unwrap();
        assert!(d.additional_keywords.is_empty());

        let mut missing = value;
        missing.as_object_mut().unwrap().remove("lighting_details");
        assert!(matches!(
            decomposition_from_value(missing),
            Err(ErrorKind::Shape(_))
        ));
        assert!(decomposition_from_value(json!([])).is_err());
    }
}
