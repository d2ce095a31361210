/// Parse a human memory size such as `512mb`, `1g` or `1048576`.
///
/// Single-letter units are decimal (`k` = 1000), two-letter units are
/// binary (`kb` = 1024). Returns `None` for unknown units or overflow.
pub fn parse_memory(value: &str) -> Option<u64> {
    let value = value.trim().to_ascii_lowercase();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits.parse().ok()?;

    let multiplier: u64 = match unit.trim() {
        "" | "b" => 1,
        "k" => 1_000,
        "kb" => 1 << 10,
        "m" => 1_000_000,
        "mb" => 1 << 20,
        "g" => 1_000_000_000,
        "gb" => 1 << 30,
        _ => return None,
    };

    amount.checked_mul(multiplier)
}
