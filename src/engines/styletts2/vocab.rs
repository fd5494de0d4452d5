use std::collections::HashMap;

use super::model::StyleTtsError;

/// Token id of the padding symbol, also used as the start-of-sequence marker.
pub const PAD_ID: i64 = 0;

const PAD: &str = "$";
const PUNCTUATION: &str = ";:,.!?¡¿—…\"«»\u{201c}\u{201d} ";
const LETTERS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const LETTERS_IPA: &str = "ɑɐɒæɓʙβɔɕçɗɖðʤəɘɚɛɜɝɞɟʄɡɠɢʛɦɧħɥʜɨɪʝɭɬɫɮʟɱɯɰŋɳɲɴøɵɸθœɶʘɹɺɾɻʀʁɽʂʃʈʧʉʊʋⱱʌɣɤʍχʎʏʑʐʒʔʡʕʢǀǁǂǃˈˌːˑʼʴʰʱʲʷˠˤ˞↓↑→↗↘'\u{0329}'ᵻ";

/// Closed phoneme vocabulary mapping each symbol to its token id.
#[derive(Debug, Clone)]
pub struct Vocab {
    ids: HashMap<char, i64>,
}

impl Vocab {
    /// The symbol table the StyleTTS2 text encoder was trained with.
    ///
    /// Ids follow the symbol order pad, punctuation, ASCII letters, IPA letters.
    /// A symbol listed twice keeps its last position.
    pub fn styletts2() -> Self {
        let ids = PAD
            .chars()
            .chain(PUNCTUATION.chars())
            .chain(LETTERS.chars())
            .chain(LETTERS_IPA.chars())
            .enumerate()
            .map(|(idx, ch)| (ch, idx as i64))
            .collect();
        Self { ids }
    }

    /// Build a vocabulary from a `symbol -> id` map such as the optional
    /// `vocab` field of `config.json`.
    ///
    /// Every key must be exactly one character.
    pub fn from_map(map: &HashMap<String, i64>) -> Result<Self, StyleTtsError> {
        let mut ids = HashMap::with_capacity(map.len());
        for (k, &v) in map {
            let mut chars = k.chars();
            let ch = chars
                .next()
                .ok_or_else(|| StyleTtsError::Config(format!("Empty key in vocab: {k:?}")))?;
            if chars.next().is_some() {
                return Err(StyleTtsError::Config(format!(
                    "Vocab key {k:?} must be a single character"
                )));
            }
            if v < 0 {
                return Err(StyleTtsError::Config(format!(
                    "Negative vocab value for key {k:?}"
                )));
            }
            ids.insert(ch, v);
        }
        Ok(Self { ids })
    }

    pub fn id(&self, symbol: char) -> Option<i64> {
        self.ids.get(&symbol).copied()
    }

    pub fn contains(&self, symbol: char) -> bool {
        self.ids.contains_key(&symbol)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Default for Vocab {
    fn default() -> Self {
        Self::styletts2()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_table_matches_trained_ids() {
        let vocab = Vocab::styletts2();
        assert_eq!(vocab.id('$'), Some(PAD_ID));
        assert_eq!(vocab.id(';'), Some(1));
        assert_eq!(vocab.id('.'), Some(4));
        assert_eq!(vocab.id(' '), Some(16));
        assert_eq!(vocab.id('A'), Some(17));
        assert_eq!(vocab.id('a'), Some(43));
        assert_eq!(vocab.id('ɑ'), Some(69));
        assert_eq!(vocab.id('ə'), Some(83));
        assert_eq!(vocab.id('ˈ'), Some(156));
        assert_eq!(vocab.id('ᵻ'), Some(177));
    }

    #[test]
    fn duplicated_apostrophe_keeps_last_position() {
        let vocab = Vocab::styletts2();
        assert_eq!(vocab.id('\''), Some(176));
        assert_eq!(vocab.id('\u{0329}'), Some(175));
    }

    #[test]
    fn unknown_symbols_are_absent() {
        let vocab = Vocab::styletts2();
        assert!(!vocab.contains('#'));
        assert!(!vocab.contains('1'));
        assert!(!vocab.contains('('));
    }

    #[test]
    fn map_override_requires_single_characters() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), 1);
        assert_eq!(Vocab::from_map(&map).unwrap().id('a'), Some(1));

        map.insert("ab".to_string(), 2);
        assert!(matches!(
            Vocab::from_map(&map),
            Err(StyleTtsError::Config(_))
        ));
    }
}
