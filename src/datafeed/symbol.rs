// =============================================================================
// Symbol resolution — chart props to a symbol descriptor + aggregation context
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::resolution::DATAFEED_RESOLUTIONS;
use crate::types::FeedVariant;

/// Wrapped SOL mint, the default quote token of launchpad pools.
pub const NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";
/// USDC mint, the quote used for market-cap charts.
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// Quote token of a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteToken {
    pub address: String,
    pub symbol: String,
    #[serde(default)]
    pub decimals: Option<u8>,
}

/// Base token details supplied by the chart host when it opens a chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintInfo {
    pub mint: String,
    pub symbol: String,
    pub decimals: u8,
    /// Total supply in whole tokens; the market-cap scale factor.
    #[serde(default)]
    pub supply: f64,
    #[serde(default)]
    pub quote: Option<QuoteToken>,
}

/// Everything the bucketer and merger need to know about a resolved symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolContext {
    pub pool_id: String,
    pub base_mint: String,
    pub quote_mint: String,
    pub base_decimals: u8,
    pub quote_decimals: Option<u8>,
    pub scale_multiplier: Option<f64>,
    pub curve_variant: Option<u8>,
    pub variant: FeedVariant,
}

/// Symbol descriptor handed to the charting widget.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolInfo {
    #[serde(rename = "poolId")]
    pub pool_id: String,
    #[serde(rename = "mintA")]
    pub mint_a: String,
    #[serde(rename = "mintB")]
    pub mint_b: String,
    pub ticker: String,
    pub name: String,
    pub full_name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub session: String,
    pub timezone: String,
    pub exchange: String,
    pub listed_exchange: String,
    pub minmov: u32,
    pub pricescale: u64,
    pub fractional: bool,
    pub has_intraday: bool,
    pub has_daily: bool,
    pub has_no_volume: bool,
    pub has_empty_bars: bool,
    pub has_weekly_and_monthly: bool,
    pub supported_resolutions: Vec<String>,
    pub intraday_multipliers: Vec<String>,
    pub volume_precision: u8,
    pub currency_code: String,
    pub data_status: String,
    pub decimals: u32,
    pub format: String,
    pub variant: FeedVariant,
}

/// Display name of a quote token; wrapped SOL shows as SOL.
fn quote_display(symbol: &str) -> String {
    if symbol.eq_ignore_ascii_case("WSOL") {
        "SOL".to_string()
    } else {
        symbol.to_string()
    }
}

/// Work out the base/quote addresses and scale factor for `symbol_name`.
///
/// Kline charts are keyed by pool id. Enriched charts are keyed
/// `"{base}_{quote}"`, and a key containing `marketcap` charts the base token
/// in USDC scaled by its supply.
fn pair_for(
    symbol_name: &str,
    mint: &MintInfo,
    variant: FeedVariant,
) -> Result<(String, String, Option<f64>), FeedError> {
    match variant {
        FeedVariant::Kline => {
            let quote = mint
                .quote
                .as_ref()
                .map_or_else(|| NATIVE_MINT.to_string(), |q| q.address.clone());
            Ok((mint.mint.clone(), quote, None))
        }
        FeedVariant::Enriched => {
            let mut parts = symbol_name.split('_');
            let base = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| {
                FeedError::CannotResolveSymbol(format!("{symbol_name}: missing base address"))
            })?;
            if symbol_name.contains("marketcap") {
                return Ok((base.to_string(), USDC_MINT.to_string(), Some(mint.supply)));
            }
            let quote = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| {
                FeedError::CannotResolveSymbol(format!("{symbol_name}: missing quote address"))
            })?;
            Ok((base.to_string(), quote.to_string(), None))
        }
    }
}

/// Build the descriptor and aggregation context for `symbol_name`.
pub fn describe(
    symbol_name: &str,
    mint: &MintInfo,
    variant: FeedVariant,
    curve_type: Option<u8>,
) -> Result<(SymbolInfo, SymbolContext), FeedError> {
    let (base_mint, quote_mint, scale_multiplier) = pair_for(symbol_name, mint, variant)?;

    let decimals = 9 + u32::from(mint.decimals) / 2;
    let quote_symbol = quote_display(mint.quote.as_ref().map_or("SOL", |q| q.symbol.as_str()));
    let pair = format!("{}-{}", mint.symbol, quote_symbol);
    let resolutions: Vec<String> = DATAFEED_RESOLUTIONS.iter().map(|r| r.to_string()).collect();

    let info = SymbolInfo {
        pool_id: symbol_name.to_string(),
        mint_a: base_mint.clone(),
        mint_b: quote_mint.clone(),
        ticker: pair.clone(),
        name: pair.clone(),
        full_name: pair.clone(),
        description: format!("{pair} pool"),
        kind: "Raydium Launchpad pool".to_string(),
        session: "24x7".to_string(),
        timezone: "Etc/UTC".to_string(),
        exchange: "Raydium".to_string(),
        listed_exchange: "Raydium".to_string(),
        minmov: 1,
        pricescale: 10u64.checked_pow(decimals).unwrap_or(u64::MAX),
        fractional: false,
        has_intraday: true,
        has_daily: true,
        has_no_volume: true,
        has_empty_bars: false,
        has_weekly_and_monthly: false,
        supported_resolutions: resolutions.clone(),
        intraday_multipliers: resolutions,
        volume_precision: 0,
        currency_code: "USD".to_string(),
        data_status: "endofday".to_string(),
        decimals,
        format: "price".to_string(),
        variant,
    };

    let context = SymbolContext {
        pool_id: symbol_name.to_string(),
        base_mint,
        quote_mint,
        base_decimals: mint.decimals,
        quote_decimals: mint.quote.as_ref().and_then(|q| q.decimals),
        scale_multiplier,
        curve_variant: curve_type,
        variant,
    };

    Ok((info, context))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mint(decimals: u8, quote: Option<QuoteToken>) -> MintInfo {
        MintInfo {
            mint: "BASEMINT".into(),
            symbol: "PUMP".into(),
            decimals,
            supply: 1_000_000_000.0,
            quote,
        }
    }

    #[test]
    fn kline_symbol_defaults_to_sol_quote() {
        let (info, ctx) = describe("POOL1", &mint(6, None), FeedVariant::Kline, Some(0)).unwrap();
        assert_eq!(info.ticker, "PUMP-SOL");
        assert_eq!(info.description, "PUMP-SOL pool");
        assert_eq!(info.decimals, 12);
        assert_eq!(info.pricescale, 1_000_000_000_000);
        assert_eq!(info.supported_resolutions, vec!["1", "5", "15"]);
        assert_eq!(ctx.quote_mint, NATIVE_MINT);
        assert_eq!(ctx.base_mint, "BASEMINT");
        assert_eq!(ctx.scale_multiplier, None);
        assert_eq!(ctx.curve_variant, Some(0));
    }

    #[test]
    fn wrapped_sol_quote_displays_as_sol() {
        let quote = QuoteToken {
            address: NATIVE_MINT.into(),
            symbol: "WSOL".into(),
            decimals: Some(9),
        };
        let (info, ctx) = describe("POOL1", &mint(9, Some(quote)), FeedVariant::Kline, None).unwrap();
        assert_eq!(info.ticker, "PUMP-SOL");
        assert_eq!(ctx.quote_decimals, Some(9));
        assert_eq!(info.decimals, 13);
    }

    #[test]
    fn enriched_pair_splits_base_and_quote() {
        let (_, ctx) = describe("BASE_QUOTE", &mint(6, None), FeedVariant::Enriched, None).unwrap();
        assert_eq!(ctx.base_mint, "BASE");
        assert_eq!(ctx.quote_mint, "QUOTE");
        assert_eq!(ctx.scale_multiplier, None);
    }

    #[test]
    fn enriched_marketcap_quotes_usdc_scaled_by_supply() {
        let (_, ctx) = describe("BASE_marketcap", &mint(6, None), FeedVariant::Enriched, None).unwrap();
        assert_eq!(ctx.base_mint, "BASE");
        assert_eq!(ctx.quote_mint, USDC_MINT);
        assert_eq!(ctx.scale_multiplier, Some(1_000_000_000.0));
    }

    #[test]
    fn enriched_without_quote_cannot_resolve() {
        let err = describe("BASE", &mint(6, None), FeedVariant::Enriched, None).unwrap_err();
        assert!(matches!(err, FeedError::CannotResolveSymbol(_)));
    }
}
