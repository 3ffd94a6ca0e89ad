use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::llm::{ImageGenerator, ReferenceImage, TextGenerator};
use crate::story::{run_story, RenderOptions, ScenarioSource, StoryError, StoryRequest, StoryRun};

/// Hash of the reference photo bytes. Only compared within one process.
pub fn photo_fingerprint(photo: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    photo.hash(&mut hasher);
    hasher.finish()
}

/// Everything a finished run depends on. A cached run is reused only while
/// all of these stay the same.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInputs {
    pub photo_fingerprint: u64,
    pub subject_name: String,
    pub theme_label: String,
    pub source: ScenarioSource,
    pub count: usize,
}

impl SessionInputs {
    pub fn new(reference: &ReferenceImage, request: &StoryRequest) -> Self {
        SessionInputs {
            photo_fingerprint: photo_fingerprint(reference.bytes()),
            subject_name: request.subject_name.trim().to_string(),
            theme_label: request.theme.label().to_string(),
            source: request.source.clone(),
            count: request.count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorySession {
    pub inputs: SessionInputs,
    pub run: Arc<StoryRun>,
}

/// Last story per interactive session, for front ends that keep a session
/// open across repeated requests (a web page re-rendering, a chat thread).
/// The one-shot `storybook` CLI does not need it.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, StorySession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last run for `session_id`, if it was produced from `inputs`.
    /// A session whose inputs have changed is discarded.
    pub fn lookup(&self, session_id: &str, inputs: &SessionInputs) -> Option<Arc<StoryRun>> {
        let mut sessions = self.sessions.lock();
        match sessions.get(session_id) {
            Some(session) if session.inputs == *inputs => Some(Arc::clone(&session.run)),
            Some(_) => {
                debug!(session_id, "Session inputs changed; discarding cached story");
                sessions.remove(session_id);
                None
            }
            None => None,
        }
    }

    pub fn remember(&self, session_id: &str, inputs: SessionInputs, run: StoryRun) -> Arc<StoryRun> {
        let run = Arc::new(run);
        self.sessions.lock().insert(
            session_id.to_string(),
            StorySession {
                inputs,
                run: Arc::clone(&run),
            },
        );
        run
    }

    /// Reuse the session's story when nothing changed, otherwise run the
    /// pipeline and remember the result. Failed runs leave no session behind.
    pub async fn run_or_reuse(
        &self,
        session_id: &str,
        text: &dyn TextGenerator,
        images: &dyn ImageGenerator,
        reference: &ReferenceImage,
        request: &StoryRequest,
        options: &RenderOptions,
    ) -> Result<Arc<StoryRun>, StoryError> {
        let inputs = SessionInputs::new(reference, request);
        if let Some(run) = self.lookup(session_id, &inputs) {
            debug!(session_id, "Reusing cached story");
            return Ok(run);
        }
        let run = run_story(text, images, reference, request, options).await?;
        Ok(self.remember(session_id, inputs, run))
    }

    pub fn forget(&self, session_id: &str) -> bool {
        self.sessions.lock().remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::illustrate::tests::{reference, StubImages};
    use crate::story::illustrate::RenderReport;
    use crate::story::scenarios::tests::StubText;
    use crate::story::Theme;

    fn inputs(photo: &[u8], subject: &str, theme: &str) -> SessionInputs {
        SessionInputs {
            photo_fingerprint: photo_fingerprint(photo),
            subject_name: subject.to_string(),
            theme_label: theme.to_string(),
            source: ScenarioSource::Generated,
            count: 8,
        }
    }

    fn run(filename: &str) -> StoryRun {
        StoryRun {
            scenarios: vec!["Mia the doctor".to_string()],
            render: RenderReport::default(),
            document: vec![1, 2, 3],
            document_filename: filename.to_string(),
        }
    }

    #[test]
    fn returns_the_cached_run_for_unchanged_inputs() {
        let store = SessionStore::new();
        let current = inputs(b"photo", "Mia", "Professions");
        store.remember("s1", current.clone(), run("a.pdf"));

        let cached = store.lookup("s1", &current).unwrap();
        assert_eq!(cached.document_filename, "a.pdf");
        assert!(store.lookup("s2", &current).is_none());
    }

    #[test]
    fn any_changed_input_invalidates_the_session() {
        let store = SessionStore::new();
        let original = inputs(b"photo", "Mia", "Professions");

        for changed in [
            inputs(b"other photo", "Mia", "Professions"),
            inputs(b"photo", "Leo", "Professions"),
            inputs(b"photo", "Mia", "Cultural Landmarks"),
        ] {
            store.remember("s1", original.clone(), run("a.pdf"));
            assert!(store.lookup("s1", &changed).is_none());
            assert!(store.is_empty());
        }

        let mut fewer = original.clone();
        fewer.count = 3;
        store.remember("s1", original, run("a.pdf"));
        assert!(store.lookup("s1", &fewer).is_none());
    }

    #[test]
    fn sessions_are_independent() {
        let store = SessionStore::new();
        store.remember("s1", inputs(b"a", "Mia", "Professions"), run("a.pdf"));
        store.remember("s2", inputs(b"b", "Leo", "Professions"), run("b.pdf"));

        assert!(store.forget("s1"));
        assert!(!store.forget("s1"));
        assert_eq!(store.len(), 1);
        let cached = store
            .lookup("s2", &inputs(b"b", "Leo", "Professions"))
            .unwrap();
        assert_eq!(cached.document_filename, "b.pdf");
    }

    #[tokio::test]
    async fn run_or_reuse_only_renders_again_after_a_change() {
        let store = SessionStore::new();
        let text = StubText::replying("Mia the doctor\nMia the pilot");
        let images = StubImages::always_ok();
        let photo = reference();
        let mut request = StoryRequest {
            subject_name: "Mia".to_string(),
            theme: Theme::parse("Professions").unwrap(),
            source: ScenarioSource::Generated,
            count: 2,
        };
        let options = RenderOptions::default();

        let first = store
            .run_or_reuse("s1", &text, &images, &photo, &request, &options)
            .await
            .unwrap();
        let second = store
            .run_or_reuse("s1", &text, &images, &photo, &request, &options)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(images.calls(), 2);

        request.theme = Theme::parse("Cultural Landmarks").unwrap();
        let third = store
            .run_or_reuse("s1", &text, &images, &photo, &request, &options)
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(images.calls(), 4);
        assert_eq!(text.prompts.lock().len(), 2);
    }
}
