use crate::output::print_json;
use prp_core::tokens::TokenLimit;

/// Parse a limit string and show what it resolves to.
pub fn run(spec: &str, json: bool) -> anyhow::Result<()> {
    let limit: TokenLimit = spec.parse()?;
    if json {
        print_json(&limit)?;
    } else {
        println!("Tokens: {}", limit.tokens);
        println!("Owner:  {}", limit.owner.as_deref().unwrap_or("-"));
    }
    Ok(())
}
