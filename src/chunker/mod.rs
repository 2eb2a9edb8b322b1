use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Token budget headroom reserved when deriving a chunk size from a model limit
const TOKEN_HEADROOM: usize = 100;

/// Approximate tokens per character for English prose
const TOKENS_PER_CHAR: f64 = 0.25;

/// Chunking parameters with documented defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSettings {
    /// Maximum chunk length in characters
    pub chunk_size: usize,

    /// Exact character overlap carried between adjacent chunks
    pub chunk_overlap: usize,

    /// Minimum chunk length; smaller chunks are merged forward
    pub min_chunk_size: usize,

    /// Split on blank-line paragraph boundaries where possible
    pub preserve_paragraphs: bool,

    /// Separator used when paragraph preservation is off
    pub separator: String,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chunk_size: 100,
            preserve_paragraphs: true,
            separator: "\n".to_string(),
        }
    }
}

impl ChunkSettings {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than zero");
        }
        if self.min_chunk_size > self.chunk_size {
            anyhow::bail!(
                "min_chunk_size {} exceeds chunk_size {}",
                self.min_chunk_size,
                self.chunk_size
            );
        }
        if self.chunk_overlap >= self.chunk_size {
            anyhow::bail!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap,
                self.chunk_size
            );
        }
        Ok(())
    }
}

/// Splits page text into overlapping chunks sized for embedding models.
///
/// Stateless between calls. Overlap is an exact character count in every
/// mode: a closed chunk's trailing `chunk_overlap` characters are carried
/// verbatim into the start of its successor.
pub struct Chunker {
    settings: ChunkSettings,
}

impl Chunker {
    pub fn new(settings: ChunkSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &ChunkSettings {
        &self.settings
    }

    /// Derive a chunk size in characters from a model's token budget,
    /// reserving headroom for metadata
    pub fn optimal_chunk_size(max_tokens: usize) -> usize {
        (max_tokens.saturating_sub(TOKEN_HEADROOM) as f64 / TOKENS_PER_CHAR) as usize
    }

    /// Split `text` into ordered chunks
    pub fn split(&self, text: &str) -> Vec<String> {
        let units = if self.settings.preserve_paragraphs {
            split_paragraphs(text)
        } else {
            text.split(self.settings.separator.as_str())
                .map(collapse_whitespace)
                .filter(|u| !u.is_empty())
                .collect()
        };

        if units.is_empty() {
            return Vec::new();
        }

        let joiner = if self.settings.preserve_paragraphs {
            "\n\n"
        } else {
            " "
        };

        // Whole document fits in one chunk
        let total: usize =
            units.iter().map(|u| char_len(u)).sum::<usize>() + joiner.len() * (units.len() - 1);
        if total <= self.settings.chunk_size {
            return vec![units.join(joiner)];
        }

        let chunks = self.accumulate(units, joiner);
        let chunks = self.merge_small(chunks);
        let chunks = self.enforce_max(chunks);

        debug!("Split {} chars into {} chunks", char_len(text), chunks.len());
        chunks
    }

    /// Greedy accumulation of units into chunks with overlap seeding
    fn accumulate(&self, units: Vec<String>, joiner: &str) -> Vec<String> {
        let max = self.settings.chunk_size;
        let min = self.settings.min_chunk_size;

        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();

        for unit in units {
            if current.is_empty() {
                self.place(unit, &mut chunks, &mut current);
                continue;
            }

            let combined = char_len(&current) + joiner.len() + char_len(&unit);
            if combined <= max || char_len(&current) < min {
                current.push_str(joiner);
                current.push_str(&unit);
                continue;
            }

            // Close the current chunk and seed the next one with its tail
            let seed = overlap_tail(&current, self.settings.chunk_overlap);
            chunks.push(std::mem::take(&mut current));
            let next = if seed.is_empty() {
                unit
            } else {
                format!("{} {}", seed, unit)
            };
            self.place(next, &mut chunks, &mut current);
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }

    /// Store `text` as the running chunk, windowing it first if oversized
    fn place(&self, text: String, chunks: &mut Vec<String>, current: &mut String) {
        if char_len(&text) <= self.settings.chunk_size {
            *current = text;
            return;
        }

        let mut pieces = self.window_split(&text);
        // The last window piece stays open so following units can join it
        if let Some(last) = pieces.pop() {
            *current = last;
        }
        chunks.extend(pieces);
    }

    /// Sliding-window split of a run longer than `chunk_size`: each window is
    /// cut back to a word boundary and the next window starts exactly
    /// `chunk_overlap` characters before the previous cut.
    fn window_split(&self, text: &str) -> Vec<String> {
        let max = self.settings.chunk_size;
        let overlap = self.settings.chunk_overlap;
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();

        let mut pieces = Vec::new();
        let mut start = 0;

        while start < total {
            let hard_end = (start + max).min(total);
            let end = if hard_end == total {
                total
            } else {
                cut_at_word_boundary(&chars, start + overlap + 1, hard_end)
            };

            pieces.push(chars[start..end].iter().collect());

            if end >= total {
                break;
            }
            start = end - overlap;
        }

        pieces
    }

    /// Merge any chunk below the minimum size forward into its successor;
    /// the final chunk is exempt
    fn merge_small(&self, chunks: Vec<String>) -> Vec<String> {
        let min = self.settings.min_chunk_size;
        let mut out = Vec::new();
        let mut carry: Option<String> = None;

        let mut iter = chunks.into_iter().peekable();
        while let Some(chunk) = iter.next() {
            let combined = match carry.take() {
                Some(prev) => format!("{} {}", prev, chunk),
                None => chunk,
            };

            if char_len(&combined) < min && iter.peek().is_some() {
                carry = Some(combined);
            } else {
                out.push(combined);
            }
        }

        if let Some(rest) = carry {
            out.push(rest);
        }

        out
    }

    /// Re-split any chunk above the maximum size at sentence boundaries
    fn enforce_max(&self, chunks: Vec<String>) -> Vec<String> {
        let max = self.settings.chunk_size;
        let mut out = Vec::new();

        for chunk in chunks {
            if char_len(&chunk) <= max {
                out.push(chunk);
                continue;
            }

            let mut current = String::new();
            for sentence in split_sentences(&chunk) {
                if current.is_empty() {
                    current = sentence;
                } else if char_len(&current) + 1 + char_len(&sentence) <= max {
                    current.push(' ');
                    current.push_str(&sentence);
                } else {
                    out.push(std::mem::take(&mut current));
                    current = sentence;
                }

                // A single sentence can still exceed the bound
                while char_len(&current) > max {
                    let chars: Vec<char> = current.chars().collect();
                    out.push(chars[..max].iter().collect());
                    current = chars[max..].iter().collect();
                }
            }
            if !current.is_empty() {
                out.push(current);
            }
        }

        out
    }
}

/// Split text into whitespace-collapsed paragraphs on blank-line boundaries
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(collapse_whitespace(&current));
                current.clear();
            }
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(collapse_whitespace(&current));
    }

    paragraphs.retain(|p| !p.is_empty());
    paragraphs
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Trailing `overlap` characters of a chunk, verbatim
fn overlap_tail(text: &str, overlap: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= overlap {
        return text.to_string();
    }
    chars[chars.len() - overlap..].iter().collect()
}

/// Last whitespace position in `(floor, hard_end)`, or `hard_end` when the
/// run has no usable boundary
fn cut_at_word_boundary(chars: &[char], floor: usize, hard_end: usize) -> usize {
    let mut i = hard_end;
    while i > floor {
        i -= 1;
        if chars[i].is_whitespace() {
            return i;
        }
    }
    hard_end
}

/// Split into sentences at `.`/`!`/`?` followed by whitespace
fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0;

    let mut i = 0;
    while i < chars.len() {
        if matches!(chars[i], '.' | '!' | '?')
            && chars.get(i + 1).map(|c| c.is_whitespace()).unwrap_or(true)
        {
            let sentence: String = chars[start..=i].iter().collect();
            let sentence = sentence.trim().to_string();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = i + 1;
        }
        i += 1;
    }

    if start < chars.len() {
        let rest: String = chars[start..].iter().collect();
        let rest = rest.trim().to_string();
        if !rest.is_empty() {
            sentences.push(rest);
        }
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize, min: usize) -> Chunker {
        Chunker::new(ChunkSettings {
            chunk_size: size,
            chunk_overlap: overlap,
            min_chunk_size: min,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunker = chunker(1000, 200, 100);
        let chunks = chunker.split("A short piece of text.");
        assert_eq!(chunks, vec!["A short piece of text.".to_string()]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunker = chunker(1000, 200, 100);
        assert!(chunker.split("").is_empty());
        assert!(chunker.split("   \n\n  ").is_empty());
    }

    #[test]
    fn document_of_2500_chars_yields_three_bounded_chunks() {
        let base = "the quick brown fox jumps over the lazy dog again. ";
        let text: String = base.repeat(50).chars().take(2500).collect();
        let expected = collapse_whitespace(&text);

        let chunker = chunker(1000, 200, 100);
        let chunks = chunker.split(&text);

        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(char_len(chunk) <= 1000, "chunk {} too long", i);
            if i + 1 < chunks.len() {
                assert!(char_len(chunk) >= 100, "chunk {} too short", i);
            }
        }

        // Each successor starts with the exact 200-char tail of its predecessor
        for pair in chunks.windows(2) {
            let tail = overlap_tail(&pair[0], 200);
            assert!(pair[1].starts_with(&tail));
        }

        // Dropping the overlaps reconstructs the cleaned source text
        let mut reconstructed = chunks[0].clone();
        for chunk in &chunks[1..] {
            reconstructed.push_str(&chunk.chars().skip(200).collect::<String>());
        }
        assert_eq!(reconstructed, expected);
    }

    #[test]
    fn paragraph_boundaries_are_preserved() {
        let p1 = "alpha ".repeat(60).trim().to_string(); // ~360 chars
        let p2 = "bravo ".repeat(60).trim().to_string();
        let p3 = "delta ".repeat(60).trim().to_string();
        let text = format!("{}\n\n{}\n\n{}", p1, p2, p3);

        let chunker = chunker(800, 100, 50);
        let chunks = chunker.split(&text);

        assert_eq!(chunks.len(), 2);
        // First chunk holds the first two whole paragraphs
        assert!(chunks[0].contains("\n\n"));
        assert!(chunks[0].starts_with(&p1));
        assert!(chunks[0].ends_with(&p2));
        // Second chunk is seeded with the tail of the first
        let tail = overlap_tail(&chunks[0], 100);
        assert!(chunks[1].starts_with(&tail));
        assert!(chunks[1].ends_with(&p3));
    }

    #[test]
    fn separator_mode_uses_custom_separator() {
        let line = "x".repeat(40);
        let text = vec![line.clone(); 20].join("|");

        let chunker = Chunker::new(ChunkSettings {
            chunk_size: 200,
            chunk_overlap: 40,
            min_chunk_size: 50,
            preserve_paragraphs: false,
            separator: "|".to_string(),
        })
        .unwrap();
        let chunks = chunker.split(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 200);
        }
        let tail = overlap_tail(&chunks[0], 40);
        assert!(chunks[1].starts_with(&tail));
    }

    #[test]
    fn undersized_chunks_merge_forward_except_the_last() {
        let chunker = chunker(1000, 200, 100);

        let merged = chunker.merge_small(vec!["tiny".to_string(), "b".repeat(500)]);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].starts_with("tiny "));

        // The final chunk may stay short
        let kept = chunker.merge_small(vec!["b".repeat(500), "tiny".to_string()]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1], "tiny");
    }

    #[test]
    fn oversized_chunks_resplit_at_sentence_boundaries() {
        let chunker = chunker(100, 20, 10);
        let text = "First sentence here. Second sentence follows! Third one asks? Fourth closes."
            .repeat(3);

        let pieces = chunker.enforce_max(vec![text]);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(char_len(piece) <= 100);
        }
        assert!(pieces[0].ends_with('.') || pieces[0].ends_with('!') || pieces[0].ends_with('?'));
    }

    #[test]
    fn optimal_chunk_size_reserves_headroom() {
        assert_eq!(Chunker::optimal_chunk_size(8192), (8192 - 100) * 4);
        assert_eq!(Chunker::optimal_chunk_size(50), 0);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(Chunker::new(ChunkSettings {
            chunk_size: 0,
            ..Default::default()
        })
        .is_err());
        assert!(Chunker::new(ChunkSettings {
            chunk_size: 100,
            chunk_overlap: 100,
            min_chunk_size: 10,
            ..Default::default()
        })
        .is_err());
        assert!(Chunker::new(ChunkSettings {
            chunk_size: 100,
            chunk_overlap: 10,
            min_chunk_size: 200,
            ..Default::default()
        })
        .is_err());
    }
}
