//! Methods exposed by the apiary binary.

mod health_check;
mod session;

use apiary_server::ApiTable;

pub fn table() -> ApiTable {
    ApiTable::new()
        .with("healthCheck", health_check::method())
        .with("session.info", session::info())
}
