//! User directory backed by the `[[users]]` config section.

use algo_options_core::{TradingUser, UserConfig, UserDirectory};
use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Default)]
pub struct ConfigUserDirectory {
    users: Vec<TradingUser>,
}

impl ConfigUserDirectory {
    #[must_use]
    pub fn new(users: &[UserConfig]) -> Self {
        Self {
            users: users.iter().map(TradingUser::from).collect(),
        }
    }

    /// First eligible user's client id, used for spot quotes when no market
    /// data client is configured.
    #[must_use]
    pub fn first_client_id(&self) -> Option<&str> {
        self.users
            .iter()
            .find(|u| u.is_eligible() && !u.is_paper())
            .map(|u| u.client_id.as_str())
    }
}

#[async_trait]
impl UserDirectory for ConfigUserDirectory {
    async fn trading_users(&self) -> Result<Vec<TradingUser>> {
        Ok(self.users.clone())
    }
}
