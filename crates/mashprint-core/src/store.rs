// Session store: every session's people, unlabeled keystrokes, and cached
// discriminator, behind one mutex.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::chunker::{labeled_chunks, Sample};
use crate::discriminator::svm::SvmParams;
use crate::discriminator::Discriminator;
use crate::error::ClassifyError;
use crate::settings::ClassifierSettings;

// ---------------------------------------------------------------------------
// Per-session state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Person {
    /// Every character this person typed during training, in order.
    mash: String,
}

#[derive(Debug)]
struct CachedDiscriminator {
    model: Arc<Discriminator>,
    /// `Session::labeled_revision` at the time of training.
    revision: u64,
}

#[derive(Debug, Default)]
struct Session {
    people: HashMap<String, Person>,
    /// Most recent unlabeled keystrokes, oldest first, never longer than the
    /// chunk size.
    unlabeled: VecDeque<char>,
    /// Bumped on every labeled keystroke.
    labeled_revision: u64,
    discriminator: Option<CachedDiscriminator>,
    discriminator_builds: u32,
    /// Held while a discriminator is being trained for this session so that
    /// concurrent first predictions wait for one build instead of racing.
    build_gate: Arc<Mutex<()>>,
}

impl Session {
    fn ensure_person(&mut self, session_id: &str, person_id: &str) {
        if !self.people.contains_key(person_id) {
            info!(session_id, person_id, "new person");
            self.people.insert(person_id.to_string(), Person::default());
        }
    }

    fn push_labeled(
        &mut self,
        session_id: &str,
        person_id: &str,
        ch: char,
    ) -> Result<(), ClassifyError> {
        let person =
            self.people
                .get_mut(person_id)
                .ok_or_else(|| ClassifyError::UnknownPerson {
                    session_id: session_id.to_string(),
                    person_id: person_id.to_string(),
                })?;
        person.mash.push(ch);
        self.labeled_revision += 1;
        Ok(())
    }

    fn push_unlabeled(&mut self, ch: char, limit: usize) {
        self.unlabeled.push_back(ch);
        while self.unlabeled.len() > limit {
            self.unlabeled.pop_front();
        }
    }

    /// The cached discriminator, unless `rebuild_on_new_labeled_data` is set
    /// and labeled keystrokes arrived after it was trained.
    fn usable_discriminator(&self, settings: &ClassifierSettings) -> Option<Arc<Discriminator>> {
        let cached = self.discriminator.as_ref()?;
        if settings.rebuild_on_new_labeled_data && cached.revision != self.labeled_revision {
            return None;
        }
        Some(Arc::clone(&cached.model))
    }

    /// Chunk every person's mash into labeled samples. People are visited in
    /// id order so training input does not depend on hash order.
    fn training_samples(&self, chunk_size: usize) -> Vec<Sample> {
        let mut ids: Vec<&String> = self.people.keys().collect();
        ids.sort();
        ids.into_iter()
            .flat_map(|id| labeled_chunks(id, &self.people[id].mash, chunk_size))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Read-only snapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of one session, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    /// `(person id, characters typed)`, sorted by person id.
    pub people: Vec<(String, usize)>,
    pub unlabeled_len: usize,
    pub has_discriminator: bool,
    pub discriminator_builds: u32,
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Owns all sessions. Construct once per process and share as
/// `Arc<SessionStore>`; every operation takes the single internal lock.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    settings: ClassifierSettings,
}

impl Default for SessionStore {
    fn default() -> Self {
        SessionStore::new(ClassifierSettings::default())
    }
}

impl SessionStore {
    pub fn new(settings: ClassifierSettings) -> Self {
        SessionStore {
            sessions: Mutex::new(HashMap::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    /// Acquire the session map.
    ///
    /// A poisoned lock is recovered: every mutation below leaves the map
    /// consistent before it can panic, so the data is still usable.
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the session, and the person if one is given, when missing.
    /// Calling it again with the same ids changes nothing.
    pub fn ensure_session_and_person(&self, session_id: &str, person_id: Option<&str>) {
        let mut sessions = self.sessions();
        ensure(&mut sessions, session_id, person_id);
    }

    /// Store one keystroke.
    ///
    /// With a `person_id` the character extends that person's training mash;
    /// without one it joins the session's unlabeled window, which keeps only
    /// the last `mash_chunk_size` characters. The session (and person) must
    /// already exist.
    pub fn append_char(
        &self,
        session_id: &str,
        person_id: Option<&str>,
        ch: char,
    ) -> Result<(), ClassifyError> {
        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ClassifyError::UnknownSession(session_id.to_string()))?;
        append(session, session_id, person_id, ch, self.settings.mash_chunk_size)
    }

    /// [`ensure_session_and_person`](Self::ensure_session_and_person) followed
    /// by [`append_char`](Self::append_char), under one lock acquisition.
    pub fn record_keystroke(
        &self,
        session_id: &str,
        person_id: Option<&str>,
        ch: char,
    ) -> Result<(), ClassifyError> {
        let mut sessions = self.sessions();
        let session = ensure(&mut sessions, session_id, person_id);
        append(session, session_id, person_id, ch, self.settings.mash_chunk_size)
    }

    /// Current unlabeled window, oldest keystroke first. May be shorter than
    /// the chunk size early in the prediction phase.
    pub fn unlabeled_buffer(&self, session_id: &str) -> Result<String, ClassifyError> {
        let sessions = self.sessions();
        let session = sessions
            .get(session_id)
            .ok_or_else(|| ClassifyError::UnknownSession(session_id.to_string()))?;
        Ok(session.unlabeled.iter().collect())
    }

    /// Return the session's discriminator, training and caching it first if
    /// there is none yet.
    ///
    /// At most one build runs per session: builders queue on the session's
    /// build gate and re-check the cache once through it. Training happens
    /// outside the store lock so other sessions keep flowing meanwhile.
    /// A failed build caches nothing; the next call tries again.
    pub fn get_or_build_discriminator(
        &self,
        session_id: &str,
    ) -> Result<Arc<Discriminator>, ClassifyError> {
        let gate = {
            let sessions = self.sessions();
            let session = sessions
                .get(session_id)
                .ok_or_else(|| ClassifyError::UnknownSession(session_id.to_string()))?;
            if let Some(model) = session.usable_discriminator(&self.settings) {
                return Ok(model);
            }
            Arc::clone(&session.build_gate)
        };

        let _building = gate.lock().unwrap_or_else(PoisonError::into_inner);

        let (samples, revision) = {
            let sessions = self.sessions();
            let session = sessions
                .get(session_id)
                .ok_or_else(|| ClassifyError::UnknownSession(session_id.to_string()))?;
            if let Some(model) = session.usable_discriminator(&self.settings) {
                debug!(session_id, "discriminator built by a concurrent request");
                return Ok(model);
            }
            (
                session.training_samples(self.settings.mash_chunk_size),
                session.labeled_revision,
            )
        };

        let model = match Discriminator::train(&samples, &SvmParams::from(&self.settings)) {
            Ok(model) => Arc::new(model),
            Err(e) => {
                warn!(session_id, "cannot build discriminator: {e}");
                return Err(e);
            }
        };

        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ClassifyError::UnknownSession(session_id.to_string()))?;
        session.discriminator = Some(CachedDiscriminator {
            model: Arc::clone(&model),
            revision,
        });
        session.discriminator_builds += 1;
        info!(
            session_id,
            samples = samples.len(),
            labels = model.labels().len(),
            build = session.discriminator_builds,
            "discriminator built"
        );
        Ok(model)
    }

    pub fn summary(&self, session_id: &str) -> Option<SessionSummary> {
        let sessions = self.sessions();
        let session = sessions.get(session_id)?;
        let mut people: Vec<(String, usize)> = session
            .people
            .iter()
            .map(|(id, p)| (id.clone(), p.mash.chars().count()))
            .collect();
        people.sort();
        Some(SessionSummary {
            session_id: session_id.to_string(),
            people,
            unlabeled_len: session.unlabeled.len(),
            has_discriminator: session.discriminator.is_some(),
            discriminator_builds: session.discriminator_builds,
        })
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }
}

fn ensure<'a>(
    sessions: &'a mut HashMap<String, Session>,
    session_id: &str,
    person_id: Option<&str>,
) -> &'a mut Session {
    let session = sessions.entry(session_id.to_string()).or_insert_with(|| {
        info!(session_id, "new session");
        Session::default()
    });
    if let Some(person_id) = person_id {
        session.ensure_person(session_id, person_id);
    }
    session
}

fn append(
    session: &mut Session,
    session_id: &str,
    person_id: Option<&str>,
    ch: char,
    chunk_size: usize,
) -> Result<(), ClassifyError> {
    match person_id {
        Some(person_id) => session.push_labeled(session_id, person_id, ch),
        None => {
            session.push_unlabeled(ch, chunk_size);
            Ok(())
        }
    }
}
