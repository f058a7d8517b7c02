fn normalize(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(substitution);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn score(input: &str, candidate: &str) -> Option<usize> {
    let (a, b) = (normalize(input), normalize(candidate));
    if a.is_empty() || b.is_empty() {
        return None;
    }
    if a == b {
        return Some(0);
    }
    if a.contains(&b) || b.contains(&a) {
        return Some(1);
    }
    let allowed = match a.len() {
        0..=4 => 1,
        5..=8 => 2,
        n => ((n as f32) * 0.35).floor().max(3.0) as usize,
    };
    Some(edit_distance(&a, &b)).filter(|distance| *distance <= allowed)
}

/// Closest candidate names for a mistyped `input`, best first.
pub fn suggest<'a, I>(input: &str, candidates: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut scored: Vec<(usize, &str)> = candidates
        .into_iter()
        .filter_map(|candidate| score(input, candidate).map(|s| (s, candidate)))
        .collect();
    scored.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.len().cmp(&b.1.len())).then(a.1.cmp(b.1)));
    scored.dedup_by(|a, b| a.1 == b.1);
    scored
        .into_iter()
        .take(limit.max(1))
        .map(|(_, name)| name.to_string())
        .collect()
}

/// `". Did you mean: x? Use one of: a, b."`, or empty when there is nothing
/// to say.
pub fn choice_hint(input: &str, known: &[&str]) -> String {
    if known.is_empty() {
        return String::new();
    }
    let mut hint = String::new();
    let suggestions = suggest(input, known.iter().copied(), 3);
    if !suggestions.is_empty() {
        hint.push_str(&format!(". Did you mean: {}?", suggestions.join(", ")));
    } else {
        hint.push('.');
    }
    hint.push_str(&format!(" Use one of: {}.", known.join(", ")));
    hint
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_names_are_suggested() {
        let known = ["list_operations", "describe", "execute", "cache_stats", "cache_clear"];
        assert_eq!(suggest("describ", known, 3), vec!["describe"]);
        assert_eq!(suggest("Cache-Stats", known, 3), vec!["cache_stats"]);
        assert!(suggest("zzzz", known, 3).is_empty());
    }

    #[test]
    fn hint_lists_known_choices() {
        let hint = choice_hint("exectue", &["execute", "describe"]);
        assert_eq!(hint, ". Did you mean: execute? Use one of: execute, describe.");
        assert_eq!(choice_hint("x", &[]), "");
    }
}
