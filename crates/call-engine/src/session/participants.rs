//! Participant roster of one call.

use crate::ports::{ParticipantSnapshot, SpeakerLevel, TrackSource, TrackState};
use std::cmp::Ordering;
use std::sync::Arc;

/// Participant as published to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub identity: String,
    pub is_local: bool,
    pub display_name: Option<String>,
    pub microphone: TrackState,
    pub camera: TrackState,
    pub screen_share: TrackState,
    pub is_speaking: bool,
    pub audio_level: f32,
    pub hand_raised: bool,
    joined_seq: u64,
}

impl Participant {
    /// No live track of any kind.
    #[must_use]
    pub fn is_inactive(&self) -> bool {
        !self.microphone.is_live() && !self.camera.is_live() && !self.screen_share.is_live()
    }

    fn track_mut(&mut self, source: TrackSource) -> &mut TrackState {
        match source {
            TrackSource::Microphone => &mut self.microphone,
            TrackSource::Camera => &mut self.camera,
            TrackSource::ScreenShare => &mut self.screen_share,
        }
    }
}

/// Local first, then speakers loudest first, then the rest with inactive
/// participants last. Join order breaks ties.
fn display_order(a: &Participant, b: &Participant) -> Ordering {
    b.is_local
        .cmp(&a.is_local)
        .then(b.is_speaking.cmp(&a.is_speaking))
        .then_with(|| {
            if a.is_speaking && b.is_speaking {
                b.audio_level.total_cmp(&a.audio_level)
            } else {
                Ordering::Equal
            }
        })
        .then(a.is_inactive().cmp(&b.is_inactive()))
        .then(a.joined_seq.cmp(&b.joined_seq))
}

/// Ordered set of participants, keyed by identity.
#[derive(Debug, Default)]
pub struct ParticipantRoster {
    participants: Vec<Participant>,
    next_seq: u64,
}

impl ParticipantRoster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a participant. Returns `true` if it was new.
    pub fn upsert(&mut self, snapshot: &ParticipantSnapshot, is_local: bool) -> bool {
        if let Some(existing) = self
            .participants
            .iter_mut()
            .find(|p| p.identity == snapshot.identity)
        {
            existing.microphone = snapshot.microphone;
            existing.camera = snapshot.camera;
            existing.screen_share = snapshot.screen_share;
            return false;
        }

        self.participants.push(Participant {
            identity: snapshot.identity.clone(),
            is_local,
            display_name: None,
            microphone: snapshot.microphone,
            camera: snapshot.camera,
            screen_share: snapshot.screen_share,
            is_speaking: false,
            audio_level: 0.0,
            hand_raised: false,
            joined_seq: self.next_seq,
        });
        self.next_seq += 1;
        self.resort();
        true
    }

    /// Remove a participant. Returns `true` if it was present.
    pub fn remove(&mut self, identity: &str) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| p.identity != identity);
        before != self.participants.len()
    }

    #[must_use]
    pub fn get(&self, identity: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.identity == identity)
    }

    #[must_use]
    pub fn contains(&self, identity: &str) -> bool {
        self.get(identity).is_some()
    }

    #[must_use]
    pub fn local(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.is_local)
    }

    #[must_use]
    pub fn remote_count(&self) -> usize {
        self.participants.iter().filter(|p| !p.is_local).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn set_display_name(&mut self, identity: &str, name: String) {
        if let Some(p) = self.participants.iter_mut().find(|p| p.identity == identity) {
            p.display_name = Some(name);
        }
    }

    /// Update one track of a participant. Returns `true` if anything changed.
    pub fn apply_track(&mut self, identity: &str, source: TrackSource, state: TrackState) -> bool {
        let Some(p) = self.participants.iter_mut().find(|p| p.identity == identity) else {
            return false;
        };
        let track = p.track_mut(source);
        if *track == state {
            return false;
        }
        *track = state;
        self.resort();
        true
    }

    /// Update the local participant's track.
    pub fn apply_local_track(&mut self, source: TrackSource, state: TrackState) -> bool {
        match self.local().map(|p| p.identity.clone()) {
            Some(identity) => self.apply_track(&identity, source, state),
            None => false,
        }
    }

    /// Apply a debounced active-speaker set. Returns `true` if the display
    /// order changed.
    pub fn apply_speakers(&mut self, speakers: &[SpeakerLevel]) -> bool {
        for p in &mut self.participants {
            match speakers.iter().find(|s| s.identity == p.identity) {
                Some(speaker) => {
                    p.is_speaking = true;
                    p.audio_level = speaker.audio_level;
                }
                None => {
                    p.is_speaking = false;
                    p.audio_level = 0.0;
                }
            }
        }
        self.resort()
    }

    /// Loudest current speaker.
    #[must_use]
    pub fn primary_speaker(&self) -> Option<String> {
        self.participants
            .iter()
            .filter(|p| p.is_speaking)
            .max_by(|a, b| a.audio_level.total_cmp(&b.audio_level))
            .map(|p| p.identity.clone())
    }

    /// Whether anyone has a live microphone.
    #[must_use]
    pub fn any_microphone_live(&self) -> bool {
        self.participants.iter().any(|p| p.microphone.is_live())
    }

    /// Mark exactly `raised` as having a hand up.
    pub fn set_hands<'a>(&mut self, raised: impl IntoIterator<Item = &'a str> + Clone) {
        for p in &mut self.participants {
            p.hand_raised = raised.clone().into_iter().any(|id| id == p.identity);
        }
    }

    /// Re-sort into display order. Returns `true` if the order changed.
    pub fn resort(&mut self) -> bool {
        let mut sorted = self.participants.clone();
        sorted.sort_by(display_order);
        let changed = sorted
            .iter()
            .map(|p| &p.identity)
            .ne(self.participants.iter().map(|p| &p.identity));
        self.participants = sorted;
        changed
    }

    /// Immutable copy for publishing.
    #[must_use]
    pub fn snapshot(&self) -> Arc<[Participant]> {
        Arc::from(self.participants.as_slice())
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }
}
