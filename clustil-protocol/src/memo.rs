/*!
Annotation ("memo") write request, viewer → kernel.
*/

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoWrite {
    pub node_id: String,
    pub gpu_id: String,
    /// Blank text deletes the annotation.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoAck {
    pub success: bool,
}

/// Empty or whitespace-only text means "no annotation".
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memo_write_uses_camel_case_keys() {
        let write = MemoWrite {
            node_id: "node-01".into(),
            gpu_id: "gpu-1-2".into(),
            text: "hold for eval".into(),
            editor: None,
        };
        let value = serde_json::to_value(&write).unwrap();
        assert_eq!(value, serde_json::json!({"nodeId": "node-01", "gpuId": "gpu-1-2", "text": "hold for eval"}));
    }

    #[test]
    fn whitespace_counts_as_blank() {
        assert!(is_blank(""));
        assert!(is_blank(" \t\n"));
        assert!(!is_blank(" x "));
    }
}
