//! NER tag policy: which tags count as sensitive, and how token-level
//! predictions collapse into entities.

use crate::types::{Entity, EntityCategory, ScreeningResult};

/// Allow-list of NER tags and the coarse category each one maps to.
///
/// Anything not listed here (`O`, `B-MISC`, `I-MISC`, ...) is discarded.
pub const TAG_TABLE: &[(&str, SpanPosition, EntityCategory)] = &[
    ("B-PER", SpanPosition::Begin, EntityCategory::Person),
    ("I-PER", SpanPosition::Inside, EntityCategory::Person),
    ("PER", SpanPosition::Whole, EntityCategory::Person),
    ("B-LOC", SpanPosition::Begin, EntityCategory::Location),
    ("I-LOC", SpanPosition::Inside, EntityCategory::Location),
    ("LOC", SpanPosition::Whole, EntityCategory::Location),
    ("B-ORG", SpanPosition::Begin, EntityCategory::Organization),
    ("I-ORG", SpanPosition::Inside, EntityCategory::Organization),
    ("ORG", SpanPosition::Whole, EntityCategory::Organization),
];

/// Where a token sits inside an entity span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanPosition {
    /// First token of a span (`B-`)
    Begin,
    /// Continuation token (`I-`)
    Inside,
    /// Already-aggregated span (`PER`, from grouped model output)
    Whole,
}

/// A parsed, allow-listed tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanTag {
    pub position: SpanPosition,
    pub category: EntityCategory,
}

impl SpanTag {
    /// Look up a raw model tag in [`TAG_TABLE`]
    pub fn parse(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        TAG_TABLE
            .iter()
            .find(|(name, _, _)| name.eq_ignore_ascii_case(tag))
            .map(|&(_, position, category)| SpanTag { position, category })
    }
}

/// One token-level prediction from the recognition model
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPrediction {
    pub tag: String,
    pub word: String,
    pub score: Option<f32>,
    /// Token position in the model's token stream
    pub index: Option<usize>,
    /// Character (not byte) offsets into the screened text
    pub start: Option<usize>,
    pub end: Option<usize>,
}

impl TokenPrediction {
    pub fn new(tag: impl Into<String>, word: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            word: word.into(),
            score: None,
            index: None,
            start: None,
            end: None,
        }
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_offsets(mut self, start: usize, end: usize) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    fn is_subword(&self) -> bool {
        self.word.starts_with("##")
    }

    /// Whether this token directly follows `prev` in the source
    fn follows(&self, prev: &TokenPrediction) -> bool {
        if let (Some(i), Some(p)) = (self.index, prev.index) {
            return i == p + 1;
        }
        if let (Some(start), Some(prev_end)) = (self.start, prev.end) {
            return start >= prev_end && start <= prev_end + 1;
        }
        true
    }
}

struct SpanBuilder {
    category: EntityCategory,
    words: String,
    start: Option<usize>,
    end: Option<usize>,
}

impl SpanBuilder {
    fn open(category: EntityCategory, token: &TokenPrediction) -> Self {
        Self {
            category,
            words: token.word.trim_start_matches("##").to_string(),
            start: token.start,
            end: token.end,
        }
    }

    fn extend(&mut self, token: &TokenPrediction) {
        if token.is_subword() {
            self.words.push_str(token.word.trim_start_matches("##"));
        } else {
            if !self.words.is_empty() {
                self.words.push(' ');
            }
            self.words.push_str(&token.word);
        }
        self.end = match (self.end, token.end) {
            (Some(_), Some(end)) => Some(end),
            _ => None,
        };
        if token.start.is_none() {
            self.start = None;
        }
    }

    fn finish(self, text: &str) -> Entity {
        let surface = match (self.start, self.end) {
            (Some(start), Some(end)) if start < end => {
                slice_chars(text, start, end).map(str::to_string)
            }
            _ => None,
        };
        Entity::new(self.category, surface.unwrap_or(self.words))
    }
}

/// Slice `text` by character positions; `None` when out of range
fn slice_chars(text: &str, start: usize, end: usize) -> Option<&str> {
    let mut boundaries = text
        .char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(text.len()));
    let from = boundaries.nth(start)?;
    let to = boundaries.nth(end - start - 1)?;
    text.get(from..to)
}

/// Collapse token predictions into allow-listed entities, in detection order.
///
/// `B-`/whole tags open a new entity; `I-` tags and `##` word pieces extend
/// the previous one when it has the same category and the token directly
/// follows it. Tags outside [`TAG_TABLE`] are dropped and break any open span.
pub fn collapse(text: &str, predictions: &[TokenPrediction]) -> ScreeningResult {
    let mut spans: Vec<SpanBuilder> = Vec::new();
    let mut prev: Option<&TokenPrediction> = None;

    for token in predictions {
        let tag = match SpanTag::parse(&token.tag) {
            Some(tag) => tag,
            None => {
                prev = None;
                continue;
            }
        };

        let continues = match (tag.position, spans.last(), prev) {
            (SpanPosition::Whole, _, _) => false,
            (SpanPosition::Begin, _, _) if !token.is_subword() => false,
            (_, Some(open), Some(prev)) => open.category == tag.category && token.follows(prev),
            _ => false,
        };

        match spans.last_mut() {
            Some(open) if continues => open.extend(token),
            _ => spans.push(SpanBuilder::open(tag.category, token)),
        }
        prev = Some(token);
    }

    spans.into_iter().map(|span| span.finish(text)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_allow_list() {
        assert_eq!(
            SpanTag::parse("B-PER"),
            Some(SpanTag {
                position: SpanPosition::Begin,
                category: EntityCategory::Person
            })
        );
        assert_eq!(SpanTag::parse("i-loc").map(|t| t.category), Some(EntityCategory::Location));
        assert_eq!(SpanTag::parse("ORG").map(|t| t.position), Some(SpanPosition::Whole));
        assert_eq!(SpanTag::parse("B-MISC"), None);
        assert_eq!(SpanTag::parse("O"), None);
    }

    #[test]
    fn test_collapse_begin_inside() {
        let text = "My name is John Smith";
        let tokens = vec![
            TokenPrediction::new("B-PER", "John").with_index(4).with_offsets(11, 15),
            TokenPrediction::new("I-PER", "Smith").with_index(5).with_offsets(16, 21),
        ];

        let result = collapse(text, &tokens);
        assert_eq!(result.entities(), &[Entity::new(EntityCategory::Person, "John Smith")]);
    }

    #[test]
    fn test_collapse_iob1_inside_only() {
        // CoNLL-03 models tag most spans I- only
        let tokens = vec![
            TokenPrediction::new("I-PER", "John").with_index(4),
            TokenPrediction::new("I-PER", "Smith").with_index(5),
            TokenPrediction::new("I-LOC", "Berlin").with_index(8),
        ];

        let result = collapse("", &tokens);
        assert_eq!(
            result.entities(),
            &[
                Entity::new(EntityCategory::Person, "John Smith"),
                Entity::new(EntityCategory::Location, "Berlin"),
            ]
        );
    }

    #[test]
    fn test_collapse_wordpieces() {
        let tokens = vec![
            TokenPrediction::new("B-ORG", "Hug").with_index(1),
            TokenPrediction::new("I-ORG", "##ging").with_index(2),
            TokenPrediction::new("I-ORG", "Face").with_index(3),
        ];

        let result = collapse("", &tokens);
        assert_eq!(result.entities()[0].surface_text, "Hugging Face");
    }

    #[test]
    fn test_non_adjacent_tokens_split() {
        let tokens = vec![
            TokenPrediction::new("I-PER", "Alice").with_index(0),
            TokenPrediction::new("I-PER", "Bob").with_index(2),
        ];

        let result = collapse("", &tokens);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_begin_always_opens_new_span() {
        let tokens = vec![
            TokenPrediction::new("B-PER", "Alice").with_index(0),
            TokenPrediction::new("B-PER", "Bob").with_index(1),
        ];

        assert_eq!(collapse("", &tokens).len(), 2);
    }

    #[test]
    fn test_misc_is_dropped_and_breaks_span() {
        let tokens = vec![
            TokenPrediction::new("I-PER", "Ada").with_index(0),
            TokenPrediction::new("I-MISC", "English").with_index(1),
            TokenPrediction::new("I-PER", "Lovelace").with_index(2),
        ];

        let result = collapse("", &tokens);
        assert_eq!(result.len(), 2);
        assert!(result
            .entities()
            .iter()
            .all(|e| e.category == EntityCategory::Person));
    }

    #[test]
    fn test_offsets_count_characters() {
        let text = "Señor John Smith called";
        let tokens = vec![
            TokenPrediction::new("I-PER", "John").with_index(2).with_offsets(6, 10),
            TokenPrediction::new("I-PER", "Smith").with_index(3).with_offsets(11, 16),
        ];

        let result = collapse(text, &tokens);
        assert_eq!(result.entities(), &[Entity::new(EntityCategory::Person, "John Smith")]);
    }

    #[test]
    fn test_offsets_after_wide_characters() {
        let text = "東京の Acme 社 🚀 ok";
        let tokens = vec![TokenPrediction::new("B-ORG", "Acme").with_offsets(4, 8)];

        let result = collapse(text, &tokens);
        assert_eq!(result.entities()[0].surface_text, "Acme");
    }

    #[test]
    fn test_out_of_range_offsets_fall_back_to_words() {
        let tokens = vec![TokenPrediction::new("B-LOC", "Oslo").with_offsets(3, 40)];

        let result = collapse("in Oslo", &tokens);
        assert_eq!(result.entities()[0].surface_text, "Oslo");
    }

    #[test]
    fn test_slice_chars() {
        assert_eq!(slice_chars("héllo", 1, 3), Some("él"));
        assert_eq!(slice_chars("héllo", 0, 5), Some("héllo"));
        assert_eq!(slice_chars("héllo", 4, 6), None);
    }

    #[test]
    fn test_category_change_opens_new_span() {
        let tokens = vec![
            TokenPrediction::new("I-ORG", "Acme").with_index(0),
            TokenPrediction::new("I-LOC", "Paris").with_index(1),
        ];

        let result = collapse("", &tokens);
        assert_eq!(result.first_category(), Some(EntityCategory::Organization));
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_aggregated_groups() {
        let text = "Acme hired Jane Doe";
        let tokens = vec![
            TokenPrediction::new("ORG", "Acme").with_offsets(0, 4),
            TokenPrediction::new("PER", "Jane Doe").with_offsets(11, 19),
        ];

        let result = collapse(text, &tokens);
        assert_eq!(result.entities()[1].surface_text, "Jane Doe");
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_bad_offsets_fall_back_to_words() {
        let tokens = vec![TokenPrediction::new("B-LOC", "Oslo").with_offsets(40, 44)];
        let result = collapse("short", &tokens);
        assert_eq!(result.entities()[0].surface_text, "Oslo");
    }

    #[test]
    fn test_empty_predictions() {
        assert!(collapse("nothing here", &[]).is_clean());
    }
}
