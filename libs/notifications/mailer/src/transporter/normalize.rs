//! Shape rules shared by every adapter.

/// Comma-join an address list. Empty lists are omitted (`None`).
pub fn join_addresses(addresses: &[String]) -> Option<String> {
    if addresses.is_empty() {
        None
    } else {
        Some(addresses.join(","))
    }
}

/// Split a comma-joined address list back into addresses
pub fn split_addresses(addresses: &str) -> impl Iterator<Item = &str> {
    addresses
        .split(',')
        .map(str::trim)
        .filter(|address| !address.is_empty())
}

/// Omit empty lists from a payload
pub fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}
