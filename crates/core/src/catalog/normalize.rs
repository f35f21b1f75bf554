//! Text folding shared by catalog matching and intent rules.

/// Lowercases, strips diacritics and turns punctuation into single spaces.
pub fn normalize(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    for character in text.chars().flat_map(char::to_lowercase) {
        let character = fold_diacritic(character);
        if character.is_alphanumeric() {
            folded.push(character);
        } else {
            folded.push(' ');
        }
    }
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercases and strips diacritics, keeping punctuation and spacing.
pub fn fold_text(text: &str) -> String {
    text.chars().flat_map(char::to_lowercase).map(fold_diacritic).collect()
}

pub fn tokens(normalized: &str) -> Vec<&str> {
    normalized.split_whitespace().collect()
}

/// Normalized text without separators, so `x-burguer` and `xburguer` compare equal.
pub fn compact(normalized: &str) -> String {
    normalized.chars().filter(|character| !character.is_whitespace()).collect()
}

pub fn fold_diacritic(character: char) -> char {
    match character {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

/// Largest edit distance accepted as a typo for a token of `length` chars.
pub fn typo_bound(length: usize) -> usize {
    match length {
        0..=3 => 0,
        4..=6 => 1,
        _ => 2,
    }
}

pub fn levenshtein(left: &str, right: &str) -> usize {
    let left = left.chars().collect::<Vec<_>>();
    let right = right.chars().collect::<Vec<_>>();
    if left.is_empty() {
        return right.len();
    }
    if right.is_empty() {
        return left.len();
    }

    let mut previous = (0..=right.len()).collect::<Vec<_>>();
    let mut current = vec![0; right.len() + 1];
    for (i, left_char) in left.iter().enumerate() {
        current[0] = i + 1;
        for (j, right_char) in right.iter().enumerate() {
            let substitution = previous[j] + usize::from(left_char != right_char);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[right.len()]
}

/// Edit distance when it falls inside the typo bound of the shorter input.
pub fn typo_distance(left: &str, right: &str) -> Option<usize> {
    let bound = typo_bound(left.chars().count().min(right.chars().count()));
    let length_gap = left.chars().count().abs_diff(right.chars().count());
    if length_gap > bound {
        return None;
    }
    let distance = levenshtein(left, right);
    (distance <= bound).then_some(distance)
}

#[cfg(test)]
mod tests {
    use super::{compact, fold_text, levenshtein, normalize, typo_bound, typo_distance};

    #[test]
    fn normalize_folds_case_accents_and_punctuation() {
        assert_eq!(normalize("  Cardápio: X-Búrguer!! "), "cardapio x burguer");
        assert_eq!(normalize("Coração de FRANGO"), "coracao de frango");
        assert_eq!(compact(&normalize("X-Burguer")), "xburguer");
        assert_eq!(fold_text("R$ 50,00 no PIX, Cartão"), "r$ 50,00 no pix, cartao");
    }

    #[test]
    fn levenshtein_counts_edits() {
        assert_eq!(levenshtein("burger", "burguer"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("pix", "pix"), 0);
    }

    #[test]
    fn typo_bound_grows_with_length() {
        assert_eq!(typo_bound(3), 0);
        assert_eq!(typo_bound(5), 1);
        assert_eq!(typo_bound(9), 2);
        assert_eq!(typo_distance("coca", "cola"), Some(1));
        assert_eq!(typo_distance("pix", "pis"), None);
        assert_eq!(typo_distance("hamburguer", "burguer"), None);
    }
}
