//! Character chunker with smart boundaries.
//!
//! Splits text into windows of at most `chunk_size` characters with a small
//! overlap, preferring to break at a paragraph, then a sentence end, then a
//! word boundary, so chunks stay readable for both embedding and display.

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 768,
            overlap: 10,
        }
    }
}

impl ChunkerConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap: overlap.min(chunk_size.saturating_sub(1)),
        }
    }
}

/// A bounded span of the source text. Offsets are character offsets into
/// the original string.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub chunk_index: usize,
}

const SENTENCE_BREAKS: [&str; 4] = [". ", "? ", "! ", "\n"];

pub fn chunk_text(text: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if chars.len() <= config.chunk_size {
        return vec![Chunk {
            text: text.to_string(),
            start_offset: 0,
            end_offset: chars.len(),
            chunk_index: 0,
        }];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;

    while start < chars.len() {
        let hard_end = (start + config.chunk_size).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            pick_boundary(&chars, start, hard_end)
        };

        let text: String = chars[start..end].iter().collect();
        chunks.push(Chunk {
            text,
            start_offset: start,
            end_offset: end,
            chunk_index: index,
        });
        index += 1;

        if end == chars.len() {
            break;
        }
        start = end.saturating_sub(config.overlap).max(start + 1);
    }
    chunks
}

/// Best break point in `(start, hard_end]`: paragraph, then sentence, then
/// word. Falls back to the hard cut when the window has no boundary in its
/// second half (avoids degenerate tiny chunks).
fn pick_boundary(chars: &[char], start: usize, hard_end: usize) -> usize {
    let window: String = chars[start..hard_end].iter().collect();
    let min_cut = (hard_end - start) / 2;

    if let Some(pos) = rfind_char_pos(&window, "\n\n") {
        if pos > min_cut {
            return start + pos + 2;
        }
    }
    let mut best_sentence = None;
    for brk in SENTENCE_BREAKS {
        if let Some(pos) = rfind_char_pos(&window, brk) {
            let cut = pos + brk.chars().count();
            if cut > min_cut {
                best_sentence = best_sentence.max(Some(cut));
            }
        }
    }
    if let Some(cut) = best_sentence {
        return start + cut;
    }
    if let Some(pos) = rfind_char_pos(&window, " ") {
        if pos > min_cut {
            return start + pos + 1;
        }
    }
    hard_end
}

/// Last occurrence of `needle`, measured in characters.
fn rfind_char_pos(haystack: &str, needle: &str) -> Option<usize> {
    let byte_pos = haystack.rfind(needle)?;
    Some(haystack[..byte_pos].chars().count())
}

/// Natural-language identity sentence prepended to the text fed to the
/// embedder, so semantic search can match on file identity.
pub fn metadata_prefix(language: &str, name: &str, relative_path: &str, directory: &str) -> String {
    format!(
        "This is a {} file named {} located at {} in the {} directory.",
        language, name, relative_path, directory
    )
}

/// Coarse language label from the file extension, for the metadata prefix.
pub fn language_label(extension: Option<&str>) -> &'static str {
    match extension.unwrap_or("") {
        "rs" => "Rust",
        "ts" | "tsx" => "TypeScript",
        "js" | "jsx" => "JavaScript",
        "py" => "Python",
        "go" => "Go",
        "java" => "Java",
        "c" | "h" => "C",
        "cpp" | "cc" | "hpp" => "C++",
        "md" | "markdown" => "Markdown",
        "json" => "JSON",
        "yaml" | "yml" => "YAML",
        "toml" => "TOML",
        "html" => "HTML",
        "css" => "CSS",
        "sh" | "bash" => "shell",
        "sql" => "SQL",
        "txt" | "" => "text",
        _ => "text",
    }
}
