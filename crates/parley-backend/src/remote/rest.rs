use parley_types::{Message, NewMessage};

use super::Inner;
use super::auth::check;
use crate::{BackendError, MESSAGES_TABLE};

impl Inner {
    pub(super) async fn select_messages(&self) -> Result<Vec<Message>, BackendError> {
        let url = self.config.endpoint(&format!("rest/v1/{}", MESSAGES_TABLE))?;
        let req = self
            .http
            .get(url)
            .query(&[("select", "*"), ("order", "created_at.asc")]);

        let resp = check(self.authorized(req, &self.bearer()).send().await?).await?;
        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub(super) async fn insert_messages(&self, rows: &[NewMessage]) -> Result<(), BackendError> {
        let url = self.config.endpoint(&format!("rest/v1/{}", MESSAGES_TABLE))?;
        let req = self
            .http
            .post(url)
            .header("Prefer", "return=minimal")
            .json(rows);

        check(self.authorized(req, &self.bearer()).send().await?).await?;
        Ok(())
    }
}
