//! Where a blocked program's input comes from

use tracing::{debug, warn};

use crate::channel::{ChannelBinding, ChannelError};
use crate::interpreter::HostIoError;
use crate::protocol::ControllerMessage;
use crate::transport::Outbox;

/// Message shown by a modal prompt when the program gave none
pub const DEFAULT_MODAL_MESSAGE: &str = "Input Request:";

/// Resolves one input read for the running program
pub trait InputSource: Send {
    fn read_input(&mut self, prompt: Option<&str>, outbox: &Outbox)
        -> Result<String, HostIoError>;
}

/// Worker-mode input: announce the request, then block on the shared channel
pub struct ChannelInput {
    binding: ChannelBinding,
}

impl ChannelInput {
    pub fn new(binding: ChannelBinding) -> Self {
        Self { binding }
    }
}

impl InputSource for ChannelInput {
    fn read_input(
        &mut self,
        prompt: Option<&str>,
        outbox: &Outbox,
    ) -> Result<String, HostIoError> {
        // Reset before announcing so a fast publish can't be wiped out
        self.binding.reset();
        outbox.send(ControllerMessage::InputRequest {
            content: prompt.map(str::to_string),
        })?;

        match self.binding.await_ready() {
            Ok(text) => {
                debug!(bytes = text.len(), "Input received over channel");
                Ok(text)
            }
            Err(ChannelError::Abandoned) => Err(HostIoError::Terminated),
            Err(e) => Err(HostIoError::Input(e.to_string())),
        }
    }
}

/// A synchronous, blocking modal read on the calling thread
pub trait ModalPrompt: Send {
    /// Returns None when the prompt was dismissed
    fn prompt(&mut self, message: &str) -> Option<String>;
}

/// Fallback input: no INPUT_REQUEST, the modal blocks the controller thread
pub struct ModalInput {
    modal: Box<dyn ModalPrompt>,
}

impl ModalInput {
    pub fn new(modal: Box<dyn ModalPrompt>) -> Self {
        Self { modal }
    }
}

impl InputSource for ModalInput {
    fn read_input(
        &mut self,
        prompt: Option<&str>,
        outbox: &Outbox,
    ) -> Result<String, HostIoError> {
        if let Some(prompt) = prompt.filter(|p| !p.is_empty()) {
            outbox.send(ControllerMessage::stdout(prompt))?;
        }
        let text = self
            .modal
            .prompt(prompt.unwrap_or(DEFAULT_MODAL_MESSAGE))
            .unwrap_or_default();
        outbox.send(ControllerMessage::stdout(format!("{}\n", text)))?;
        Ok(text)
    }
}

/// Used when INIT carried no channel: every read is end-of-input
pub struct NoInput;

impl InputSource for NoInput {
    fn read_input(
        &mut self,
        _prompt: Option<&str>,
        _outbox: &Outbox,
    ) -> Result<String, HostIoError> {
        warn!("Program requested input but no input channel is bound");
        Err(HostIoError::Input("no input channel".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SharedChannel;
    use crate::controller::ControllerEvent;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    struct Scripted(Option<String>);

    impl ModalPrompt for Scripted {
        fn prompt(&mut self, _message: &str) -> Option<String> {
            self.0.take()
        }
    }

    fn messages(rx: &mpsc::Receiver<ControllerEvent>) -> Vec<ControllerMessage> {
        rx.try_iter()
            .filter_map(|event| match event {
                ControllerEvent::Host { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_channel_input_posts_request_then_blocks() {
        let channel = SharedChannel::default();
        let (tx, rx) = mpsc::channel();
        let outbox = Outbox::new(1, tx);
        let mut input = ChannelInput::new(channel.bind());

        let reader = thread::spawn(move || input.read_input(Some("Name? "), &outbox));

        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        match event {
            ControllerEvent::Host { message, .. } => assert_eq!(
                message,
                ControllerMessage::InputRequest {
                    content: Some("Name? ".into())
                }
            ),
            _ => panic!("expected host message"),
        }
        channel.publish_str("Ada").unwrap();
        assert_eq!(reader.join().unwrap(), Ok("Ada".to_string()));
    }

    #[test]
    fn test_channel_input_abandoned_means_terminated() {
        let channel = SharedChannel::default();
        let (tx, rx) = mpsc::channel();
        let outbox = Outbox::new(1, tx);
        let mut input = ChannelInput::new(channel.bind());

        let reader = thread::spawn(move || input.read_input(None, &outbox));
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        channel.abandon_waiters();
        assert_eq!(reader.join().unwrap(), Err(HostIoError::Terminated));
    }

    #[test]
    fn test_modal_input_prints_prompt_and_echo() {
        let (tx, rx) = mpsc::channel();
        let outbox = Outbox::new(1, tx);
        let mut input = ModalInput::new(Box::new(Scripted(Some("Grace".into()))));

        assert_eq!(input.read_input(Some("Who? "), &outbox).unwrap(), "Grace");
        assert_eq!(
            messages(&rx),
            vec![
                ControllerMessage::stdout("Who? "),
                ControllerMessage::stdout("Grace\n"),
            ]
        );
    }

    #[test]
    fn test_dismissed_modal_yields_empty_string() {
        let (tx, _rx) = mpsc::channel();
        let outbox = Outbox::new(1, tx);
        let mut input = ModalInput::new(Box::new(Scripted(None)));
        assert_eq!(input.read_input(None, &outbox).unwrap(), "");
    }
}
