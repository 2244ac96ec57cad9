//! Subordinate strategy
//!
//! Subordinates have no units or package origin of their own; they follow
//! their principal and are upgraded solely through charm refresh and
//! channel switch.

use crate::analyze::{AnalyzedApp, CloudSnapshot};
use crate::catalog::ReleaseCatalog;
use crate::config::UpgradeContext;
use crate::error::PlanError;
use crate::steps::{Action, Step};
use crate::strategy::wait_app_idle;

pub fn plan(
    app: &AnalyzedApp,
    snapshot: &CloudSnapshot,
    catalog: &ReleaseCatalog,
    ctx: &UpgradeContext,
) -> Result<Option<Step>, PlanError> {
    let target = snapshot.target;
    let name = app.name();
    let target_channel = catalog.target_channel(app.charm(), snapshot.series, target)?;

    let mut group = Step::group(format!("Upgrade plan for '{name}' to '{target}'"))
        .prompted()
        .for_app(name);

    if app.app.can_upgrade {
        group.add(
            Step::leaf(
                format!(
                    "Refresh '{name}' to the latest revision of '{}'",
                    app.app.channel
                ),
                Action::RefreshCharm {
                    app: name.to_string(),
                },
            )
            .for_app(name),
        );
    }

    if app.app.channel != target_channel {
        group.add(
            Step::leaf(
                format!("Upgrade '{name}' to the new channel: '{target_channel}'"),
                Action::SwitchChannel {
                    app: name.to_string(),
                    channel: target_channel,
                },
            )
            .for_app(name),
        );
        group.add(wait_app_idle(
            name,
            ctx.idle_timeout(catalog.uses_long_idle(app.charm())),
        ));
    }

    Ok(group.has_work().then_some(group))
}
