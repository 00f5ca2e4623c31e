//! Chat history persistence.

use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use services::store::{load_or, save, KvStore};
use shared::chat_api::ChatTurn;

const STORE_KEY: &str = "history";

pub struct HistoryStore {
    store: Arc<dyn KvStore>,
    turns: Vec<ChatTurn>,
}

impl HistoryStore {
    pub async fn load(store: Arc<dyn KvStore>) -> Result<Self> {
        let turns = load_or(store.as_ref(), STORE_KEY, Vec::new).await?;
        Ok(Self { store, turns })
    }

    pub fn all(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub async fn add(&mut self, turn: ChatTurn) -> Result<()> {
        self.turns.push(turn);
        self.persist().await
    }

    pub async fn remove(&mut self, id: Uuid) -> Result<()> {
        self.turns.retain(|t| t.id != id);
        self.persist().await
    }

    pub async fn clear(&mut self) -> Result<()> {
        self.turns.clear();
        self.store.remove(STORE_KEY).await
    }

    async fn persist(&self) -> Result<()> {
        save(self.store.as_ref(), STORE_KEY, &self.turns).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use services::store::FileKvStore;

    #[tokio::test]
    async fn test_turns_survive_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let store: Arc<dyn KvStore> = Arc::new(FileKvStore::new(tmp.path().to_path_buf()).unwrap());

        let mut turn = ChatTurn::new("what is rust", Vec::new());
        turn.answer = "a systems language".into();
        turn.tool_trace.push(("search".into(), "{\"keywords\":\"rust\"}".into()));
        let id = turn.id;

        {
            let mut history = HistoryStore::load(store.clone()).await.unwrap();
            history.add(turn).await.unwrap();
        }
        let mut history = HistoryStore::load(store.clone()).await.unwrap();
        assert_eq!(history.all().len(), 1);
        assert_eq!(history.all()[0].tool_trace[0].0, "search");

        history.remove(id).await.unwrap();
        let history = HistoryStore::load(store).await.unwrap();
        assert!(history.all().is_empty());
    }
}
