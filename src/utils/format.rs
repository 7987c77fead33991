/// Render a base-unit amount with `decimals` fractional digits, e.g. `1_500_000_000` at
/// 9 decimals is `"1.500000000"`.
pub fn format_token_amount(amount: u64, decimals: u32) -> String {
	if decimals == 0 {
		return amount.to_string();
	}
	let scale = 10u128.pow(decimals);
	let amount = u128::from(amount);
	format!(
		"{}.{:0width$}",
		amount / scale,
		amount % scale,
		width = decimals as usize
	)
}

/// First and last few characters of a signature for log lines.
pub fn short_signature(signature: &str) -> String {
	if signature.len() <= 12 || !signature.is_ascii() {
		return signature.to_string();
	}
	format!("{}..{}", &signature[..6], &signature[signature.len() - 6..])
}
