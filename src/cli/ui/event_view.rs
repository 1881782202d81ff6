use std::fmt::{self, Display, Formatter};

use crate::session::SessionEvent;

use super::painter::Painter;

/// Renders one session event as a terminal line.
pub(crate) struct SessionEventView<'a> {
    event: &'a SessionEvent,
    painter: &'a Painter,
}

impl<'a> SessionEventView<'a> {
    pub(crate) fn new(event: &'a SessionEvent, painter: &'a Painter) -> Self {
        Self { event, painter }
    }
}

impl Display for SessionEventView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.event {
            SessionEvent::Log(line) => write!(f, "{line}"),
            SessionEvent::Status(status) => write!(
                f,
                "{} {}",
                self.painter.muted(format!("[{}]", status.severity())),
                self.painter.status(status.severity(), status.message())
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::session::EventSink;

    fn first_event(emit: impl FnOnce(&EventSink)) -> SessionEvent {
        let (sink, mut events) = EventSink::channel();
        emit(&sink);
        events.try_recv().expect("event emitted")
    }

    #[test]
    fn log_lines_render_verbatim() {
        let event = first_event(|sink| sink.log("Found: HR Strap (AA:01)"));
        let painter = Painter::new(true);

        assert_eq!(
            "Found: HR Strap (AA:01)",
            SessionEventView::new(&event, &painter).to_string()
        );
    }

    #[test]
    fn status_lines_carry_their_severity() {
        let event = first_event(|sink| {
            sink.status("Connection lost", crate::session::Severity::Warning);
        });
        let painter = Painter::new(false);

        assert_eq!(
            "[warning] Connection lost",
            SessionEventView::new(&event, &painter).to_string()
        );
    }
}
