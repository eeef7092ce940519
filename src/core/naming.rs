//! Naming conventions for resources
//!
//! Models are declared with CamelCase names (`BlogPost`). A single record is
//! exposed under the snake-cased name (`blog_post`) and a collection under the
//! table name, which defaults to the plural of the snake-cased name
//! (`blog_posts`).

/// Convert a CamelCase identifier to snake_case
///
/// Acronyms are kept together, so `HTTPServer` becomes `http_server`.
///
/// # Examples
///
/// ```
/// use modelrest::core::naming::snake_case;
///
/// assert_eq!(snake_case("BlogEntry"), "blog_entry");
/// assert_eq!(snake_case("UserLanguage"), "user_language");
/// assert_eq!(snake_case("Country"), "country");
/// ```
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut snake = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary && prev != '_' {
                snake.push('_');
            }
        }
        snake.extend(c.to_lowercase());
    }

    snake
}

/// Pluralize an English noun
///
/// Only the last `_`-separated word is pluralized, so `blog_entry` becomes
/// `blog_entries`.
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }

    let (head, last) = match word.rfind('_') {
        Some(idx) => word.split_at(idx + 1),
        None => ("", word),
    };

    let plural = match last {
        "" => String::new(),
        "person" => "people".to_string(),
        "child" => "children".to_string(),
        s if s.ends_with('y') && s.len() > 1 && !ends_with_vowel_then(s, 'y') => {
            format!("{}ies", &s[..s.len() - 1])
        }
        s if ["s", "sh", "ch", "x", "z"].iter().any(|end| s.ends_with(end)) => {
            format!("{}es", s)
        }
        s if s.ends_with("fe") && s.len() > 2 => format!("{}ves", &s[..s.len() - 2]),
        s if s.ends_with('f') && !s.ends_with("ff") && s.len() > 1 => {
            format!("{}ves", &s[..s.len() - 1])
        }
        s if s.ends_with('o') && s.len() > 1 && !ends_with_vowel_then(s, 'o') => match s {
            "photo" | "piano" | "halo" | "video" | "memo" => format!("{}s", s),
            _ => format!("{}es", s),
        },
        s => format!("{}s", s),
    };

    format!("{}{}", head, plural)
}

/// Default table (collection) name for a model name
pub fn table_name(model_name: &str) -> String {
    pluralize(&snake_case(model_name))
}

fn ends_with_vowel_then(word: &str, last: char) -> bool {
    let mut rev = word.chars().rev();
    rev.next() == Some(last) && rev.next().is_some_and(|c| "aeiou".contains(c))
}
