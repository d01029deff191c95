use anyhow::{Context, bail};
use marketplace_ledger::{Item, MarketConfig, MarketService, TradeRequest, TransactionRecord};
use std::env;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: marketplace-ledger \
    <items [search] | item <id> | requests <identity-id> | transactions>";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let config = MarketConfig::from_env();
    let service = MarketService::open(config.clone())
        .with_context(|| format!("failed to open store at {}", config.db_path.display()))?;

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["items"] => print_items(&service.query_items(None, None, None, None)?),
        ["items", search] => print_items(&service.query_items(Some(*search), None, None, None)?),
        ["item", id] => {
            let item = service.get_item(id)?;
            print_items(std::slice::from_ref(&item));
            for entry in item.history() {
                println!(
                    "  sold {} -> {} for {} at {}",
                    entry.from_owner_id,
                    entry.to_owner_id,
                    entry.price,
                    entry.timestamp.to_datetime_utc()
                );
            }
        }
        ["requests", identity] => print_requests(&service.list_trade_requests(identity)?),
        ["transactions"] => print_transactions(&service.list_transactions()?),
        _ => bail!(USAGE),
    }

    Ok(())
}

fn print_items(items: &[Item]) {
    for item in items {
        let listing = if item.is_for_sale() {
            format!("listed at {}", item.price())
        } else {
            "not listed".to_string()
        };
        println!(
            "{} {:<12} {:<24} owner={} {}",
            item.id,
            item.category.as_str(),
            item.metadata.name,
            item.owner_id(),
            listing
        );
    }
}

fn print_requests(requests: &[TradeRequest]) {
    for request in requests {
        println!(
            "{} {:<8} item={} ({}) buyer={} seller={} price={}",
            request.id,
            request.status(),
            request.item_id,
            request.item_name,
            request.buyer_name,
            request.seller_name,
            request.price
        );
    }
}

fn print_transactions(records: &[TransactionRecord]) {
    for record in records {
        println!(
            "{} {} {} -> {} item={} {}",
            record.id,
            record.kind,
            record.from_id,
            record.to_id,
            record.item_id,
            record.memo
        );
    }
}
