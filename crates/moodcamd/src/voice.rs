//! Voice feedback: a delayed, last-write-wins dispatcher in front of a
//! speech synthesizer.

use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpeechError {
    #[error("failed to start synthesizer: {0}")]
    Spawn(String),
    #[error("synthesizer exited with {0}")]
    Exit(String),
    #[error("synthesizer wait failed: {0}")]
    Io(String),
}

/// Progress of one utterance, tagged with the id it was spoken under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Started { id: u64 },
    Finished { id: u64 },
    Failed { id: u64, error: SpeechError },
}

impl SpeechEvent {
    pub fn id(&self) -> u64 {
        match self {
            SpeechEvent::Started { id }
            | SpeechEvent::Finished { id }
            | SpeechEvent::Failed { id, .. } => *id,
        }
    }
}

/// Something that can render text as speech.
pub trait VoiceChannel: Send {
    /// Begin speaking `text` and report its progress on `events`.
    fn speak(&mut self, id: u64, text: String, events: mpsc::UnboundedSender<SpeechEvent>);

    /// Silence anything in flight. No events are owed for cancelled utterances.
    fn cancel_all(&mut self);
}

/// Why the dispatcher needs attention.
#[derive(Debug)]
pub enum VoiceWakeup {
    /// A scheduled message reached its deadline.
    Due(String),
    Event(SpeechEvent),
}

pub struct VoiceDispatcher<V> {
    channel: V,
    delay: Duration,
    muted: bool,
    scheduled: Option<(Instant, String)>,
    /// Id of the utterance handed to the channel most recently, while it may still be audible.
    current: Option<u64>,
    speaking: bool,
    next_id: u64,
    events_tx: mpsc::UnboundedSender<SpeechEvent>,
    events_rx: mpsc::UnboundedReceiver<SpeechEvent>,
}

impl<V: VoiceChannel> VoiceDispatcher<V> {
    pub fn new(channel: V, delay: Duration, muted: bool) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            channel,
            delay,
            muted,
            scheduled: None,
            current: None,
            speaking: false,
            next_id: 0,
            events_tx,
            events_rx,
        }
    }

    /// Schedule `text` to be spoken after the dispatch delay, replacing
    /// anything still waiting. Dropped while muted.
    pub fn submit(&mut self, text: impl Into<String>) {
        let text = text.into();
        if self.muted {
            tracing::debug!(%text, "voice muted; message dropped");
            return;
        }
        if let Some((_, old)) = self.scheduled.replace((Instant::now() + self.delay, text)) {
            tracing::debug!(superseded = %old, "scheduled message replaced");
        }
    }

    /// Wait for the scheduled deadline or the next speech event, whichever comes first.
    ///
    /// Cancel-safe: dropping the future before it resolves loses nothing.
    pub async fn next_wakeup(&mut self) -> VoiceWakeup {
        let deadline = self.scheduled.as_ref().map(|(at, _)| *at);
        let due = tokio::select! {
            Some(event) = self.events_rx.recv() => return VoiceWakeup::Event(event),
            _ = sleep_until_opt(deadline) => self.scheduled.take(),
        };
        match due {
            Some((_, text)) => VoiceWakeup::Due(text),
            None => std::future::pending().await,
        }
    }

    pub fn handle(&mut self, wakeup: VoiceWakeup) {
        match wakeup {
            VoiceWakeup::Due(text) => self.speak_now(text),
            VoiceWakeup::Event(event) => self.handle_event(event),
        }
    }

    fn speak_now(&mut self, text: String) {
        self.channel.cancel_all();
        self.next_id += 1;
        let id = self.next_id;
        self.current = Some(id);
        self.speaking = false;
        tracing::info!(id, %text, "speaking");
        self.channel.speak(id, text, self.events_tx.clone());
    }

    fn handle_event(&mut self, event: SpeechEvent) {
        if self.current != Some(event.id()) {
            tracing::trace!(id = event.id(), "ignoring event from a cancelled utterance");
            return;
        }
        match event {
            SpeechEvent::Started { .. } => self.speaking = true,
            SpeechEvent::Finished { .. } => {
                self.speaking = false;
                self.current = None;
            }
            SpeechEvent::Failed { id, error } => {
                tracing::warn!(id, error = %error, "speech failed");
                self.speaking = false;
                self.current = None;
            }
        }
    }

    /// Drop the scheduled message and silence the current utterance.
    pub fn cancel_all(&mut self) {
        self.scheduled = None;
        self.current = None;
        self.speaking = false;
        self.channel.cancel_all();
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if muted {
            self.cancel_all();
        }
        tracing::info!(muted, "voice mute changed");
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Speech through an `espeak-ng` compatible executable, one child per utterance.
pub struct EspeakVoice {
    program: String,
    rate: f32,
    current: Option<JoinHandle<()>>,
}

/// espeak-ng speaks at 175 words per minute by default.
const BASE_WORDS_PER_MINUTE: f32 = 175.0;

impl EspeakVoice {
    pub fn new(program: impl Into<String>, rate: f32) -> Self {
        Self {
            program: program.into(),
            rate,
            current: None,
        }
    }

    fn words_per_minute(&self) -> u32 {
        (BASE_WORDS_PER_MINUTE * self.rate.clamp(0.1, 4.0)).round() as u32
    }
}

impl VoiceChannel for EspeakVoice {
    fn speak(&mut self, id: u64, text: String, events: mpsc::UnboundedSender<SpeechEvent>) {
        self.cancel_all();

        let mut command = Command::new(&self.program);
        command
            .arg("-s")
            .arg(self.words_per_minute().to_string())
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        self.current = Some(tokio::spawn(async move {
            let mut child = match command.spawn() {
                Ok(child) => child,
                Err(e) => {
                    let _ = events.send(SpeechEvent::Failed {
                        id,
                        error: SpeechError::Spawn(e.to_string()),
                    });
                    return;
                }
            };
            let _ = events.send(SpeechEvent::Started { id });

            let event = match child.wait().await {
                Ok(status) if status.success() => SpeechEvent::Finished { id },
                Ok(status) => SpeechEvent::Failed {
                    id,
                    error: SpeechError::Exit(status.to_string()),
                },
                Err(e) => SpeechEvent::Failed {
                    id,
                    error: SpeechError::Io(e.to_string()),
                },
            };
            let _ = events.send(event);
        }));
    }

    fn cancel_all(&mut self) {
        // Aborting drops the child, which kills it.
        if let Some(task) = self.current.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records what it was asked to say; tests drive the speech events.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingVoice {
        pub spoken: Arc<Mutex<Vec<(u64, String)>>>,
        pub cancels: Arc<Mutex<usize>>,
        pub events: Arc<Mutex<Option<mpsc::UnboundedSender<SpeechEvent>>>>,
    }

    impl RecordingVoice {
        pub fn texts(&self) -> Vec<String> {
            self.spoken.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
        }

        pub fn emit(&self, event: SpeechEvent) {
            let events = self.events.lock().unwrap();
            events.as_ref().expect("nothing spoken yet").send(event).unwrap();
        }
    }

    impl VoiceChannel for RecordingVoice {
        fn speak(&mut self, id: u64, text: String, events: mpsc::UnboundedSender<SpeechEvent>) {
            self.spoken.lock().unwrap().push((id, text));
            *self.events.lock().unwrap() = Some(events);
        }

        fn cancel_all(&mut self) {
            *self.cancels.lock().unwrap() += 1;
        }
    }

    fn dispatcher() -> (VoiceDispatcher<RecordingVoice>, RecordingVoice) {
        let voice = RecordingVoice::default();
        (
            VoiceDispatcher::new(voice.clone(), Duration::from_millis(300), false),
            voice,
        )
    }

    async fn pump(dispatcher: &mut VoiceDispatcher<RecordingVoice>) {
        let wakeup = dispatcher.next_wakeup().await;
        dispatcher.handle(wakeup);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_is_spoken_after_delay() {
        let (mut dispatcher, voice) = dispatcher();
        let submitted = Instant::now();
        dispatcher.submit("hello");

        pump(&mut dispatcher).await;
        assert_eq!(voice.texts(), vec!["hello"]);
        assert!(submitted.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_message_replaces_scheduled_one() {
        let (mut dispatcher, voice) = dispatcher();
        dispatcher.submit("first");
        tokio::time::advance(Duration::from_millis(100)).await;
        dispatcher.submit("second");

        pump(&mut dispatcher).await;
        assert_eq!(voice.texts(), vec!["second"]);

        // Nothing else is scheduled.
        let idle = tokio::time::timeout(Duration::from_secs(5), dispatcher.next_wakeup()).await;
        assert!(idle.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_muted_messages_are_dropped_not_deferred() {
        let (mut dispatcher, voice) = dispatcher();
        dispatcher.set_muted(true);
        dispatcher.submit("quiet please");
        dispatcher.set_muted(false);

        let idle = tokio::time::timeout(Duration::from_secs(5), dispatcher.next_wakeup()).await;
        assert!(idle.is_err());
        assert!(voice.texts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_drops_scheduled_and_cancels_in_flight() {
        let (mut dispatcher, voice) = dispatcher();
        dispatcher.submit("one");
        pump(&mut dispatcher).await;
        voice.emit(SpeechEvent::Started { id: 1 });
        pump(&mut dispatcher).await;
        assert!(dispatcher.is_speaking());

        dispatcher.submit("two");
        let cancels_before = *voice.cancels.lock().unwrap();
        dispatcher.set_muted(true);
        assert!(!dispatcher.is_speaking());
        assert!(*voice.cancels.lock().unwrap() > cancels_before);

        let idle = tokio::time::timeout(Duration::from_secs(5), dispatcher.next_wakeup()).await;
        assert!(idle.is_err());
        assert_eq!(voice.texts(), vec!["one"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speaking_cancels_previous_utterance() {
        let (mut dispatcher, voice) = dispatcher();
        dispatcher.submit("one");
        pump(&mut dispatcher).await;
        let cancels = *voice.cancels.lock().unwrap();

        dispatcher.submit("two");
        pump(&mut dispatcher).await;
        assert_eq!(*voice.cancels.lock().unwrap(), cancels + 1);
        assert_eq!(voice.texts(), vec!["one", "two"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speaking_indicator_follows_events() {
        let (mut dispatcher, voice) = dispatcher();
        dispatcher.submit("hi");
        pump(&mut dispatcher).await;
        assert!(!dispatcher.is_speaking());

        voice.emit(SpeechEvent::Started { id: 1 });
        pump(&mut dispatcher).await;
        assert!(dispatcher.is_speaking());

        voice.emit(SpeechEvent::Failed {
            id: 1,
            error: SpeechError::Exit("exit status: 1".into()),
        });
        pump(&mut dispatcher).await;
        assert!(!dispatcher.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_from_cancelled_utterance_are_ignored() {
        let (mut dispatcher, voice) = dispatcher();
        dispatcher.submit("one");
        pump(&mut dispatcher).await;
        dispatcher.submit("two");
        pump(&mut dispatcher).await;

        voice.emit(SpeechEvent::Started { id: 2 });
        pump(&mut dispatcher).await;
        voice.emit(SpeechEvent::Finished { id: 1 });
        pump(&mut dispatcher).await;
        assert!(dispatcher.is_speaking());
    }

    #[test]
    fn test_espeak_rate_scaling() {
        assert_eq!(EspeakVoice::new("espeak-ng", 1.0).words_per_minute(), 175);
        assert_eq!(EspeakVoice::new("espeak-ng", 0.9).words_per_minute(), 158);
    }

    async fn collect_events(program: &str) -> Vec<SpeechEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut voice = EspeakVoice::new(program, 0.9);
        voice.speak(7, "hello".into(), tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = !matches!(event, SpeechEvent::Started { .. });
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn test_espeak_reports_completion() {
        let events = collect_events("true").await;
        assert_eq!(
            events,
            vec![SpeechEvent::Started { id: 7 }, SpeechEvent::Finished { id: 7 }]
        );
    }

    #[tokio::test]
    async fn test_espeak_reports_nonzero_exit() {
        let events = collect_events("false").await;
        assert!(matches!(
            events.last(),
            Some(SpeechEvent::Failed { id: 7, error: SpeechError::Exit(_) })
        ));
    }

    #[tokio::test]
    async fn test_espeak_reports_missing_program() {
        let events = collect_events("/nonexistent/moodcam-espeak").await;
        assert!(matches!(
            events.as_slice(),
            [SpeechEvent::Failed { id: 7, error: SpeechError::Spawn(_) }]
        ));
    }
}
