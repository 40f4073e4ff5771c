//! Pull a single code block out of a model reply.
//!
//! Preference order: a block tagged with the target language, the first
//! untagged block, the first block with any other tag, then the raw reply.
//! Extraction never fails; it degrades to the trimmed reply text.

use serde::Serialize;

use crate::generator::Language;

/// Which rule produced the extracted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    TaggedBlock,
    UntaggedBlock,
    OtherBlock,
    RawText,
}

#[derive(Debug, PartialEq)]
struct FencedBlock {
    tag: Option<String>,
    body: String,
}

pub fn extract_code(reply: &str, language: Language) -> (String, ExtractionSource) {
    let blocks = fenced_blocks(reply);

    if let Some(block) = blocks
        .iter()
        .find(|b| b.tag.as_deref().is_some_and(|t| language.matches_tag(t)))
    {
        return (block.body.clone(), ExtractionSource::TaggedBlock);
    }

    if let Some(block) = blocks.iter().find(|b| b.tag.is_none()) {
        return (block.body.clone(), ExtractionSource::UntaggedBlock);
    }

    if let Some(block) = blocks.into_iter().next() {
        return (block.body, ExtractionSource::OtherBlock);
    }

    (reply.trim().to_string(), ExtractionSource::RawText)
}

/// Opening fence: marker char, run length, and the info-string tag.
fn parse_opening(line: &str) -> Option<(char, usize, Option<String>)> {
    let trimmed = line.trim_start();
    let marker = trimmed.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let run = trimmed.chars().take_while(|c| *c == marker).count();
    if run < 3 {
        return None;
    }

    let info = trimmed[run..].trim();
    if marker == '`' && info.contains('`') {
        return None;
    }

    let tag = info
        .split_whitespace()
        .next()
        .map(|t| t.trim_start_matches(['{', '.']).trim_end_matches('}'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase());

    Some((marker, run, tag))
}

fn is_closing(line: &str, marker: char, run: usize) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= run && trimmed.chars().all(|c| c == marker)
}

fn fenced_blocks(text: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let Some((marker, run, tag)) = parse_opening(line) else {
            continue;
        };

        let mut body: Vec<&str> = Vec::new();
        let mut closed = false;
        for inner in lines.by_ref() {
            if is_closing(inner, marker, run) {
                closed = true;
                break;
            }
            body.push(inner);
        }

        // An unterminated fence runs to the end of the text and is not a block
        if closed {
            blocks.push(FencedBlock {
                tag,
                body: body.join("\n"),
            });
        }
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_block_is_returned_without_fences() {
        let reply = "Here you go:\n```python\na = 1\nb = 2\nprint(a + b)\n```\nEnjoy!";
        let (code, source) = extract_code(reply, Language::Python);
        assert_eq!(code, "a = 1\nb = 2\nprint(a + b)");
        assert_eq!(source, ExtractionSource::TaggedBlock);
    }

    #[test]
    fn test_tagged_block_preferred_over_earlier_blocks() {
        let reply = "```\npip install nothing\n```\n\n```Python\nprint('hi')\n```";
        let (code, source) = extract_code(reply, Language::Python);
        assert_eq!(code, "print('hi')");
        assert_eq!(source, ExtractionSource::TaggedBlock);
    }

    #[test]
    fn test_alias_tags() {
        let (code, _) = extract_code("```py\nx = 1\n```", Language::Python);
        assert_eq!(code, "x = 1");
        let (code, _) = extract_code("~~~python3\ny = 2\n~~~", Language::Python);
        assert_eq!(code, "y = 2");
    }

    #[test]
    fn test_untagged_block_fallback() {
        let reply = "```bash\necho hi\n```\n```\nprint(5)\n```";
        let (code, source) = extract_code(reply, Language::Python);
        assert_eq!(code, "print(5)");
        assert_eq!(source, ExtractionSource::UntaggedBlock);
    }

    #[test]
    fn test_other_tag_fallback() {
        let (code, source) = extract_code("```text\nprint(5)\n```", Language::Python);
        assert_eq!(code, "print(5)");
        assert_eq!(source, ExtractionSource::OtherBlock);
    }

    #[test]
    fn test_raw_text_when_no_fences() {
        let (code, source) = extract_code("  print(1 + 1)\n", Language::Python);
        assert_eq!(code, "print(1 + 1)");
        assert_eq!(source, ExtractionSource::RawText);
    }

    #[test]
    fn test_unterminated_fence_degrades_to_raw() {
        let reply = "```python\nprint(1)";
        let (code, source) = extract_code(reply, Language::Python);
        assert_eq!(code, reply);
        assert_eq!(source, ExtractionSource::RawText);
    }

    #[test]
    fn test_longer_fence_contains_shorter() {
        let reply = "````python\ns = \"```\"\nprint(s)\n````";
        let (code, _) = extract_code(reply, Language::Python);
        assert_eq!(code, "s = \"```\"\nprint(s)");
    }

    #[test]
    fn test_crlf_line_endings() {
        let (code, _) = extract_code("```python\r\nprint(2)\r\n```\r\n", Language::Python);
        assert_eq!(code, "print(2)");
    }
}
