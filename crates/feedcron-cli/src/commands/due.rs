use anyhow::Result;
use feedcron_core::FeedcronConfig;
use feedcron_scheduler::due::DueSelector;

use crate::app::App;

pub fn due(config: FeedcronConfig) -> Result<()> {
    let app = App::build(config, None)?;
    let selector = DueSelector::new(app.store.clone());
    if let Some(process) = selector.pick_due(app.lifecycle.now())? {
        println!("{}", serde_json::to_string_pretty(&process)?);
    }
    Ok(())
}
