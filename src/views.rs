// src/views.rs
use crate::models::{format_money, format_quantity, Currency, Portfolio, TransactionRecord};
use std::fmt::Write;

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn index(currencies: &[Currency]) -> String {
    let mut html = String::from(
        "<h1>Top currencies</h1>\n<table>\n<tr><th>Symbol</th><th>Name</th><th>Price</th></tr>\n",
    );
    for currency in currencies {
        let symbol = escape(&currency.symbol);
        let _ = writeln!(
            html,
            "<tr><td><a href=\"/currencies/{}\">{}</a></td><td>{}</td><td>${}</td></tr>",
            symbol,
            symbol,
            escape(&currency.name),
            format_money(currency.price)
        );
    }
    html.push_str("</table>\n");
    html
}

pub fn currency(currency: &Currency) -> String {
    let symbol = escape(&currency.symbol);
    format!(
        "<h1>{} ({})</h1>\n<p>Price: ${}</p>\n\
         <form method=\"post\" action=\"/currency/buy\">\
         <input type=\"hidden\" name=\"symbol\" value=\"{}\">\
         <input type=\"text\" name=\"quantity\">\
         <button type=\"submit\">Buy</button></form>\n",
        escape(&currency.name),
        symbol,
        format_money(currency.price),
        symbol
    )
}

pub fn success(message: &str) -> String {
    format!("<div class=\"success\">{}</div>\n", escape(message))
}

pub fn error(message: &str) -> String {
    format!("<div class=\"error\">{}</div>\n", escape(message))
}

pub fn portfolio(portfolio: &Portfolio) -> String {
    let mut html = String::from("<h1>Wallet</h1>\n");
    if portfolio.wallet_details.is_empty() {
        html.push_str("<p>There are no items in your wallet.</p>\n");
    } else {
        html.push_str(
            "<table>\n<tr><th>Symbol</th><th>Amount</th><th>Average price</th><th>Profitability</th></tr>\n",
        );
        for detail in &portfolio.wallet_details {
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td>${}</td><td>{}</td></tr>",
                escape(&detail.symbol),
                format_quantity(detail.amount),
                detail.average_price,
                detail.profitability
            );
        }
        html.push_str("</table>\n");
    }
    let _ = writeln!(html, "<p>Balance: ${}</p>", portfolio.total_balance);
    html
}

pub fn history(records: &[TransactionRecord]) -> String {
    let mut html = String::from("<h1>Transactions</h1>\n");
    if records.is_empty() {
        html.push_str("<p>No transactions yet.</p>\n");
        return html;
    }
    html.push_str(
        "<table>\n<tr><th>Date</th><th>Kind</th><th>Symbol</th><th>Price</th><th>Quantity</th></tr>\n",
    );
    for record in records {
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>${}</td><td>{}</td></tr>",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.kind,
            escape(&record.symbol),
            format_money(record.price),
            format_quantity(record.quantity)
        );
    }
    html.push_str("</table>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TradeKind, WalletDetail};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    #[test]
    fn markup_is_escaped() {
        assert_eq!(
            error("<script>alert('x')</script> & more"),
            "<div class=\"error\">&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt; &amp; more</div>\n"
        );
    }

    #[test]
    fn index_links_every_currency() {
        let html = index(&[
            Currency {
                symbol: "BTC".into(),
                name: "Bitcoin".into(),
                price: Decimal::new(6412350, 2),
            },
            Currency {
                symbol: "ETH".into(),
                name: "Ethereum".into(),
                price: Decimal::from(3100),
            },
        ]);
        assert!(html.contains("<a href=\"/currencies/BTC\">BTC</a>"));
        assert!(html.contains("$64,123.50"));
        assert!(html.contains("<td>Ethereum</td>"));
    }

    #[test]
    fn portfolio_lists_holdings_and_balance() {
        let html = portfolio(&Portfolio {
            wallet_details: vec![WalletDetail {
                symbol: "BTC".into(),
                amount: Decimal::new(25, 1),
                average_price: "100.00".into(),
                profitability: "50.00%".into(),
            }],
            total_balance: "770.00".into(),
        });
        assert!(html.contains("<td>BTC</td><td>2.5</td><td>$100.00</td><td>50.00%</td>"));
        assert!(html.contains("Balance: $770.00"));

        let empty = portfolio(&Portfolio {
            wallet_details: vec![],
            total_balance: "1,000.00".into(),
        });
        assert!(empty.contains("There are no items in your wallet."));
    }

    #[test]
    fn history_shows_each_record() {
        let html = history(&[TransactionRecord {
            id: "t1".into(),
            user_id: "u1".into(),
            kind: TradeKind::Sell,
            symbol: "BTC".into(),
            price: Decimal::from(300),
            quantity: Decimal::from(3),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
        }]);
        assert!(html.contains("<td>2024-05-01 12:30:00</td><td>sell</td><td>BTC</td><td>$300.00</td><td>3</td>"));
        assert!(history(&[]).contains("No transactions yet."));
    }
}
