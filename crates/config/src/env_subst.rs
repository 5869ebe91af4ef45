/// Replace `${VAR}` and `${VAR:-fallback}` placeholders using the process
/// environment.
///
/// A variable that is unset or empty takes the fallback when one is given.
/// Unresolvable placeholders without a fallback are left as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

/// Same as [`substitute_env`] with `lookup` resolving variable names.
pub fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated, emit the remainder literally.
            result.push_str(&rest[start..]);
            return result;
        };
        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        let value = (!name.is_empty())
            .then(|| lookup(name))
            .flatten()
            .filter(|v| !v.is_empty() || fallback.is_none());
        match (value, fallback) {
            (Some(v), _) => result.push_str(&v),
            (None, Some(fallback)) if !name.is_empty() => result.push_str(fallback),
            _ => result.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    result
}
