use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::excerpt;

/** \brief ParseError 中保留的原文长度。 */
const PARSE_EXCERPT_LEN: usize = 200;

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json|JSON)?\s*").expect("code fence pattern"));
static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("trailing comma pattern"));
static BARE_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:").expect("bare key pattern")
});
static SINGLE_QUOTED_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([{,]\s*)'([^'"]*)'\s*:"#).expect("quoted key pattern"));
static SINGLE_QUOTED_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#":\s*'([^'"]*)'"#).expect("quoted value pattern"));
static SINGLE_QUOTED_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([\[,]\s*)'([^'"]*)'(\s*[,\]])"#).expect("quoted item pattern")
});

/**
 * \brief 所有恢复手段均失败时返回，携带截断后的原文片段用于排查。
 */
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("response was not valid JSON: {excerpt}")]
pub struct ParseError {
    pub excerpt: String,
}

impl ParseError {
    fn from_raw(raw: &str) -> Self {
        Self {
            excerpt: excerpt(raw, PARSE_EXCERPT_LEN),
        }
    }
}

/**
 * \brief 成功解析时所处的恢复层级。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Recovery {
    Direct,
    Cleaned,
    Sliced,
    Repaired,
}

/**
 * \brief 从模型输出中提取一个 JSON 值（数组或对象）。
 */
pub fn extract_json(raw: &str) -> Result<Value, ParseError> {
    recover(raw).map(|(value, _)| value)
}

/**
 * \brief 仅做直接解析，用于已声明响应 Schema、可信任其输出的后端。
 */
pub fn parse_strict(raw: &str) -> Result<Value, ParseError> {
    serde_json::from_str(raw.trim()).map_err(|_| ParseError::from_raw(raw))
}

/**
 * \brief 逐级尝试恢复，返回解析结果与成功的层级。
 * \details 每一级都对已合法的输入保持幂等，按激进程度递增：
 *          直接解析 → 清理围栏与转义 → 截取括号区间 → 语法修复。
 */
pub fn recover(raw: &str) -> Result<(Value, Recovery), ParseError> {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return Ok((value, Recovery::Direct));
    }

    let cleaned = clean(raw);
    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        return Ok((value, Recovery::Cleaned));
    }

    let slice = slice_outer_brackets(&cleaned).ok_or_else(|| ParseError::from_raw(raw))?;
    if let Ok(value) = serde_json::from_str::<Value>(slice) {
        return Ok((value, Recovery::Sliced));
    }

    if let Ok(value) = serde_json::from_str::<Value>(&strip_trailing_commas(slice)) {
        return Ok((value, Recovery::Repaired));
    }

    let repaired = repair(slice);
    serde_json::from_str::<Value>(&repaired)
        .map(|value| (value, Recovery::Repaired))
        .map_err(|_| ParseError::from_raw(raw))
}

fn clean(raw: &str) -> String {
    let without_fences = CODE_FENCE.replace_all(raw, "");
    let flattened: String = without_fences
        .chars()
        .map(|c| if matches!(c, '\n' | '\r' | '\t') { ' ' } else { c })
        .collect();
    let unescaped = if flattened.contains("\\\"") && !has_bare_quote(&flattened) {
        flattened.replace("\\\"", "\"")
    } else {
        flattened
    };
    fix_escapes(&unescaped)
}

/**
 * \brief 将非法转义（如 `\_`）中的反斜杠加倍，合法转义保持不变。
 */
fn fix_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&next)
                if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') =>
            {
                out.push(c);
                out.push(next);
                chars.next();
            }
            _ => out.push_str("\\\\"),
        }
    }
    out
}

/**
 * \brief 是否存在未被反斜杠转义的双引号；全部被转义说明整段 JSON 被二次转义。
 */
fn has_bare_quote(text: &str) -> bool {
    let mut escaped = false;
    for c in text.chars() {
        match c {
            '\\' => escaped = !escaped,
            '"' if !escaped => return true,
            _ => escaped = false,
        }
    }
    false
}

fn slice_outer_brackets(text: &str) -> Option<&str> {
    let start = ['[', '{'].iter().filter_map(|c| text.find(*c)).min()?;
    let end = [']', '}'].iter().filter_map(|c| text.rfind(*c)).max()?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

/**
 * \brief 语法修复：单引号转双引号、补全裸键名、去掉尾随逗号。
 * \details 所有改写只作用于双引号字符串之外，字符串内容原样保留。
 */
fn repair(slice: &str) -> String {
    let mut out = outside_strings(slice, |seg| {
        let seg = SINGLE_QUOTED_KEY.replace_all(seg, "$1\"$2\":");
        SINGLE_QUOTED_VALUE.replace_all(&seg, ":\"$1\"").into_owned()
    });
    // 相邻的数组项共用逗号，单次替换会漏掉一半
    loop {
        let next = outside_strings(&out, |seg| {
            SINGLE_QUOTED_ITEM.replace_all(seg, "$1\"$2\"$3").into_owned()
        });
        if next == out {
            break;
        }
        out = next;
    }
    out = outside_strings(&out, |seg| BARE_KEY.replace_all(seg, "$1\"$2\":").into_owned());
    strip_trailing_commas(&out)
}

fn strip_trailing_commas(text: &str) -> String {
    outside_strings(text, |seg| TRAILING_COMMA.replace_all(seg, "$1").into_owned())
}

/**
 * \brief 对双引号字符串之外的片段逐段应用 `rewrite`；未闭合的字符串视为延伸到末尾。
 */
fn outside_strings(text: &str, rewrite: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('"') {
        out.push_str(&rewrite(&rest[..open]));
        let close = closing_quote(&rest[open + 1..])
            .map(|idx| open + 1 + idx + 1)
            .unwrap_or(rest.len());
        out.push_str(&rest[open..close]);
        rest = &rest[close..];
    }
    out.push_str(&rewrite(rest));
    out
}

fn closing_quote(text: &str) -> Option<usize> {
    let mut escaped = false;
    for (idx, c) in text.char_indices() {
        match c {
            '\\' => escaped = !escaped,
            '"' if !escaped => return Some(idx),
            _ => escaped = false,
        }
    }
    None
}
