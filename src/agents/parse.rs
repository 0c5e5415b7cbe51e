//! Pulls code, JSON and markdown out of free-form model output.

const FENCE: &str = "```";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fence<'a> {
    tag: &'a str,
    body: &'a str,
}

/// Splits `text` into fenced blocks. An unterminated fence runs to the end.
fn fences(text: &str) -> Vec<Fence<'_>> {
    let mut blocks = Vec::new();
    let mut cursor = 0;

    while let Some(open) = text[cursor..].find(FENCE) {
        let start = cursor + open + FENCE.len();
        let (end, next) = match text[start..].find(FENCE) {
            Some(close) => (start + close, start + close + FENCE.len()),
            None => (text.len(), text.len()),
        };
        let segment = &text[start..end];

        let block = match segment.split_once('\n') {
            Some((first, rest)) if looks_like_tag(first) => Fence {
                tag: first.trim(),
                body: rest,
            },
            _ => Fence {
                tag: "",
                body: segment,
            },
        };
        blocks.push(block);
        cursor = next;
    }

    blocks
}

fn looks_like_tag(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '#' | '.' | '_'))
}

fn tagged<'a>(blocks: &[Fence<'a>], tags: &[&str]) -> Option<&'a str> {
    blocks
        .iter()
        .find(|block| tags.iter().any(|tag| block.tag.eq_ignore_ascii_case(tag)))
        .map(|block| block.body)
}

/// Code for `language`: a block tagged with the language, else the first
/// fenced block, else the whole text. Always trimmed.
pub fn extract_code_block(text: &str, language: &str) -> String {
    let blocks = fences(text);
    let body = tagged(&blocks, &[language])
        .or_else(|| blocks.first().map(|block| block.body))
        .unwrap_or(text);
    body.trim().to_string()
}

/// JSON delimited by `open`/`close`: a `json` block, else the span from the
/// first `open` to the last `close`.
pub fn extract_json_block(text: &str, open: char, close: char) -> Option<String> {
    let blocks = fences(text);
    if let Some(body) = tagged(&blocks, &["json"]) {
        return Some(body.trim().to_string());
    }

    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| text[start..=end].to_string())
}

pub fn extract_markdown_block(text: &str) -> String {
    let blocks = fences(text);
    tagged(&blocks, &["markdown", "md"])
        .unwrap_or(text)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_block_tagged_with_language() {
        let text = "Here:\n```bash\npip install x\n```\nand\n```python\nprint('hi')\n```\n";
        assert_eq!(extract_code_block(text, "python"), "print('hi')");
    }

    #[test]
    fn falls_back_to_first_fence_without_its_tag_line() {
        let text = "```js\nconst a = 1;\n```\n```js\nconst b = 2;\n```";
        assert_eq!(extract_code_block(text, "typescript"), "const a = 1;");
    }

    #[test]
    fn untagged_fence_keeps_its_first_line() {
        let text = "```\nx = 1\ny = 2\n```";
        assert_eq!(extract_code_block(text, "python"), "x = 1\ny = 2");

        let text = "```\nfoo(bar)\n```";
        assert_eq!(extract_code_block(text, "python"), "foo(bar)");
    }

    #[test]
    fn first_line_that_is_code_is_not_a_tag() {
        let text = "```x = 1\ny = 2\n```";
        assert_eq!(extract_code_block(text, "python"), "x = 1\ny = 2");
    }

    #[test]
    fn no_fence_returns_trimmed_text() {
        assert_eq!(extract_code_block("  \n def f(): pass \n", "python"), "def f(): pass");
    }

    #[test]
    fn unterminated_fence_runs_to_end() {
        assert_eq!(extract_code_block("```python\nprint(1)\n", "python"), "print(1)");
    }

    #[test]
    fn tag_match_is_exact_word() {
        let text = "```python3\na = 1\n```\n```python\nb = 2\n```";
        assert_eq!(extract_code_block(text, "python"), "b = 2");
    }

    #[test]
    fn json_prefers_fence_then_outer_brackets() {
        let fenced = "Result:\n```json\n[{\"a\": 1}]\n```";
        assert_eq!(
            extract_json_block(fenced, '[', ']').as_deref(),
            Some("[{\"a\": 1}]")
        );

        let bare = "Sure! [{\"a\": [1, 2]}] hope that helps";
        assert_eq!(
            extract_json_block(bare, '[', ']').as_deref(),
            Some("[{\"a\": [1, 2]}]")
        );

        assert_eq!(extract_json_block("nothing here", '{', '}'), None);
    }

    #[test]
    fn markdown_block_or_whole_text() {
        assert_eq!(
            extract_markdown_block("intro\n```markdown\n# Title\n\nBody\n```"),
            "# Title\n\nBody"
        );
        assert_eq!(extract_markdown_block("\n# Title\n"), "# Title");
    }
}
