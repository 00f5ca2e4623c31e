//! Persisted prompt actions.

use std::sync::Arc;

use anyhow::Result;

use services::store::{load_or, save, KvStore};
use shared::config::{Action, DEFAULT_MODEL_ID};
use shared::error::AssistError;

const STORE_KEY: &str = "actions";

const APP_PROMPT: &str = "Act as an application. You should only output the result of the prompt. \
Do not include any additional information.";

/// Actions seeded on first run.
pub fn initial_actions() -> Vec<Action> {
    let entry = |id: &str, title: &str, description: &str, icon: &str, prompt: String| Action {
        id: id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        icon: icon.to_string(),
        prompt,
        model_id: DEFAULT_MODEL_ID.to_string(),
        default: false,
        show_diff: false,
    };

    let mut actions = vec![
        entry(
            "1",
            "Summarize",
            "Summarize the text",
            "Paragraph",
            format!("{} Summarize the text in 1-2 sentences. {{{{select}}}}", APP_PROMPT),
        ),
        entry(
            "2",
            "Translate",
            "Translate the text",
            "Globe",
            "Only reply the translated result and nothing else. Please translate to Chinese:\n\n{{select}}"
                .to_string(),
        ),
        entry(
            "3",
            "Correct Punctuation & Grammar",
            "Correct the punctuation and grammar",
            "Pencil",
            format!(
                "{} Correct the punctuation and grammar in the following text. {{{{select}}}}",
                APP_PROMPT
            ),
        ),
        entry(
            "4",
            "Code Review",
            "Review the code",
            "EyeDropper",
            format!("{} Review the following code and provide feedback. {{{{select}}}}", APP_PROMPT),
        ),
        entry(
            "5",
            "Generate Email",
            "Generate a formal email",
            "Envelope",
            format!("{} Generate a formal email based on the following text. {{{{clipboard}}}}", APP_PROMPT),
        ),
        entry(
            "6",
            "Summarize Website",
            "Summarize the page open in the browser",
            "MagnifyingGlass",
            format!(
                "{} Summarize the text below and give me a list of bullet points with key insights and the most important facts.{{{{content}}}}",
                APP_PROMPT
            ),
        ),
    ];
    actions[0].default = true;

    let mut fix = entry(
        "7",
        "Fix Spelling and Grammar",
        "Rewrite the selection with spelling and grammar fixed",
        "Pencil",
        "Act as a spelling corrector and improver. Reply to each message only with the rewritten text.\n\n\
Strictly follow these rules:\n\
- Correct spelling, grammar and punctuation\n\
- ALWAYS detect and maintain the original language of the text\n\
- NEVER surround the rewritten text with quotes\n\
- Don't replace urls with markdown links\n\
- Don't change emojis\n\n\
Text: {{select}}\n\nFixed Text:"
            .to_string(),
    );
    fix.show_diff = true;
    actions.push(fix);

    actions
}

pub struct ActionStore {
    store: Arc<dyn KvStore>,
    actions: Vec<Action>,
}

impl ActionStore {
    pub async fn load(store: Arc<dyn KvStore>) -> Result<Self> {
        let actions = load_or(store.as_ref(), STORE_KEY, initial_actions).await?;
        Ok(Self { store, actions })
    }

    pub fn all(&self) -> &[Action] {
        &self.actions
    }

    pub fn find(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    pub fn default_action(&self) -> Option<&Action> {
        self.actions.iter().find(|a| a.default)
    }

    /// New actions go to the front of the list, mirroring the UI order.
    pub async fn add(&mut self, action: Action) -> Result<()> {
        action.validate().map_err(AssistError::Validation)?;
        self.actions.insert(0, action);
        self.persist().await
    }

    pub async fn update(&mut self, action: Action) -> Result<()> {
        action.validate().map_err(AssistError::Validation)?;
        if let Some(index) = self.actions.iter().position(|a| a.id == action.id) {
            self.actions[index] = action;
            self.persist().await?;
        }
        Ok(())
    }

    pub async fn delete(&mut self, id: &str) -> Result<()> {
        self.actions.retain(|a| a.id != id);
        self.persist().await
    }

    /// Make `id` the default; every other holder is unset in the same
    /// write, so at most one action carries the flag.
    pub async fn set_default(&mut self, id: &str) -> Result<()> {
        for action in &mut self.actions {
            action.default = action.id == id;
        }
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        save(self.store.as_ref(), STORE_KEY, &self.actions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use services::store::FileKvStore;

    async fn store_in(dir: &std::path::Path) -> Arc<dyn KvStore> {
        Arc::new(FileKvStore::new(dir.to_path_buf()).unwrap())
    }

    fn count_defaults(actions: &[Action]) -> usize {
        actions.iter().filter(|a| a.default).count()
    }

    #[tokio::test]
    async fn test_seeded_on_first_load() {
        let tmp = tempfile::tempdir().unwrap();
        let actions = ActionStore::load(store_in(tmp.path()).await).await.unwrap();
        assert!(!actions.all().is_empty());
        assert_eq!(count_defaults(actions.all()), 1);
        assert_eq!(actions.default_action().unwrap().title, "Summarize");
    }

    #[tokio::test]
    async fn test_set_default_unsets_previous_holder() {
        let tmp = tempfile::tempdir().unwrap();
        let mut actions = ActionStore::load(store_in(tmp.path()).await).await.unwrap();

        actions.set_default("5").await.unwrap();
        assert_eq!(count_defaults(actions.all()), 1);
        assert_eq!(actions.default_action().unwrap().id, "5");

        // repeat from a different starting state
        actions.set_default("2").await.unwrap();
        assert_eq!(count_defaults(actions.all()), 1);
        assert_eq!(actions.default_action().unwrap().id, "2");
    }

    #[tokio::test]
    async fn test_mutations_survive_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path()).await;
        {
            let mut actions = ActionStore::load(store.clone()).await.unwrap();
            let mut extra = actions.all()[0].clone();
            extra.id = "99".into();
            extra.title = "Shorten".into();
            extra.default = false;
            actions.add(extra).await.unwrap();
            actions.delete("3").await.unwrap();
        }
        let reloaded = ActionStore::load(store).await.unwrap();
        assert_eq!(reloaded.all()[0].id, "99");
        assert!(reloaded.find("3").is_none());
    }

    #[tokio::test]
    async fn test_add_rejects_prompt_without_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let mut actions = ActionStore::load(store_in(tmp.path()).await).await.unwrap();
        let before = actions.all().len();

        let mut bad = actions.all()[0].clone();
        bad.id = "x".into();
        bad.prompt = "no tags here".into();
        assert!(actions.add(bad).await.is_err());
        assert_eq!(actions.all().len(), before);
    }
}
