//! Embedding input text framing.
//!
//! Every chunk is embedded together with a small header naming its file
//! and, when known, its function. Retrieval-time queries are framed the
//! same way, so this format must stay byte-for-byte stable:
//!
//! ```text
//! File: <file_path>
//! Function: <function_name>
//!
//! <code_snippet>
//! ```
//!
//! The `Function:` line is omitted when the chunk has no function name.

use crate::models::PendingChunk;

/// Build the text that is sent to the embedding model for one chunk.
pub fn embedding_input(chunk: &PendingChunk) -> String {
    frame(
        &chunk.file_path,
        chunk.function_name.as_deref(),
        &chunk.code_snippet,
    )
}

/// Build embedding inputs for a batch, preserving chunk order.
pub fn embedding_inputs(chunks: &[PendingChunk]) -> Vec<String> {
    chunks.iter().map(embedding_input).collect()
}

fn frame(file_path: &str, function_name: Option<&str>, code_snippet: &str) -> String {
    // An empty function name counts as absent.
    match function_name.filter(|f| !f.is_empty()) {
        Some(function) => format!(
            "File: {}\nFunction: {}\n\n{}",
            file_path, function, code_snippet
        ),
        None => format!("File: {}\n\n{}", file_path, code_snippet),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: i64, function_name: Option<&str>) -> PendingChunk {
        PendingChunk {
            id,
            file_path: "a.py".to_string(),
            function_name: function_name.map(str::to_string),
            code_snippet: "code".to_string(),
        }
    }

    #[test]
    fn test_with_function_name() {
        assert_eq!(
            embedding_input(&chunk(1, Some("foo"))),
            "File: a.py\nFunction: foo\n\ncode"
        );
    }

    #[test]
    fn test_without_function_name() {
        assert_eq!(embedding_input(&chunk(1, None)), "File: a.py\n\ncode");
    }

    #[test]
    fn test_empty_function_name_is_omitted() {
        assert_eq!(embedding_input(&chunk(1, Some(""))), "File: a.py\n\ncode");
    }

    #[test]
    fn test_snippet_kept_verbatim() {
        let c = PendingChunk {
            id: 7,
            file_path: "src/lib.rs".to_string(),
            function_name: Some("run".to_string()),
            code_snippet: "fn run() {\n    todo!()\n}\n".to_string(),
        };
        assert_eq!(
            embedding_input(&c),
            "File: src/lib.rs\nFunction: run\n\nfn run() {\n    todo!()\n}\n"
        );
    }

    #[test]
    fn test_batch_preserves_order() {
        let chunks = vec![chunk(1, Some("b")), chunk(2, None), chunk(3, Some("a"))];
        let texts = embedding_inputs(&chunks);
        assert_eq!(texts.len(), 3);
        assert!(texts[0].contains("Function: b"));
        assert!(!texts[1].contains("Function:"));
        assert!(texts[2].contains("Function: a"));
    }
}
