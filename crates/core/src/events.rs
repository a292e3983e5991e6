//! Events emitted by the streaming recognizer.

/// Classification of a recognizer stream error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    /// The websocket to the recognizer dropped or could not be established.
    Transport,
    /// The recognizer sent something this client could not interpret.
    Protocol,
    /// The recognizer reported an error of its own.
    Service,
}

/// A recognition event, delivered in recognizer order.
///
/// Interim transcripts are advisory; only finals bound a user turn.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// The recognizer detected the onset of speech.
    SpeechStarted,
    /// A transcript still subject to revision.
    Interim { text: String },
    /// A committed transcript; the boundary of a user turn.
    Final {
        text: String,
        /// Audio seconds covered by this utterance.
        duration: f64,
        confidence: f64,
    },
    /// The stream failed; the client attempts one reconnect after this.
    Error {
        kind: RecognitionErrorKind,
        message: String,
    },
    /// The stream is closed; no further events follow.
    Closed,
}

impl RecognitionEvent {
    /// Interim events may be dropped under backpressure; nothing else may.
    pub fn is_droppable(&self) -> bool {
        matches!(self, RecognitionEvent::Interim { .. })
    }
}
