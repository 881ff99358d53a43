//! Quote-aware splitting of module location lists.

/// Split a space-separated list of locations.
///
/// Double quotes group a location containing spaces; quote characters are
/// dropped. Each piece between delimiters is trimmed, and adjacent quoted and
/// unquoted pieces join into one location. Empty locations are skipped.
pub fn split_locations(value: &str) -> Vec<String> {
    let mut locations = Vec::new();
    let mut current = String::new();
    let mut piece = String::new();
    let mut in_quotes = false;

    for ch in value.chars() {
        match ch {
            '"' => {
                current.push_str(piece.trim());
                piece.clear();
                in_quotes = !in_quotes;
            }
            ' ' if !in_quotes => {
                current.push_str(piece.trim());
                piece.clear();
                if !current.is_empty() {
                    locations.push(std::mem::take(&mut current));
                }
            }
            _ => piece.push(ch),
        }
    }

    current.push_str(piece.trim());
    if !current.is_empty() {
        locations.push(current);
    }
    locations
}
