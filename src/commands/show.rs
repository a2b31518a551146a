use crate::context::AppContext;
use crate::store::ResultStore;
use anyhow::{anyhow, Result};

/// Lists stored results, or prints one document without its symbol data.
pub async fn run(app: &AppContext, id: Option<&str>) -> Result<()> {
    let store = app.store();
    let Some(id) = id else {
        for id in store.result_ids() {
            if let Some(document) = store.get_result(&id)? {
                println!("{}\t{:?}", id, document.status);
            }
        }
        return Ok(());
    };

    let mut document = store
        .get_result(id)?
        .ok_or_else(|| anyhow!("No result with id {}", id))?;
    if let Some(results) = document.results.as_mut() {
        results.symbol_data.clear();
    }
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}
