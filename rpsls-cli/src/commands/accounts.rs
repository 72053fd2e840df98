use super::connect_ledger;
use comfy_table::{presets::UTF8_FULL, Table};
use rpsls_core::GameConfig;

pub async fn list_accounts(config: &GameConfig) -> anyhow::Result<()> {
    let gateway = connect_ledger(config)?;
    let accounts = gateway.client().request_addresses().await?;

    if accounts.is_empty() {
        println!("The wallet node at {} exposes no accounts.", config.rpc_url);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "Address"]);
    for (index, account) in accounts.iter().enumerate() {
        table.add_row(vec![index.to_string(), format!("{:?}", account)]);
    }

    println!("Accounts on {}:", config.rpc_url);
    println!("{}", table);
    println!("Games are played from the first account.");

    Ok(())
}
