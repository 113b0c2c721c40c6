/*!
 # Command channel

 The thin send primitive: turns a logical instruction (color, power,
 brightness) into its binary frame and writes it over the active
 connection. Also the owner of the "last color / lamp on" snapshot the
 schedule tick consults before sending.
*/

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::LampClient;
use crate::protocol::{brightness_frame, color_frame, Color, POWER_OFF_FRAME};
use crate::transport::Transport;
use crate::Result;

struct LampState {
    last_color: Option<Color>,
    is_on: bool,
}

/// Sends logical instructions to the connected lamp
pub struct CommandChannel<T: Transport> {
    client: Arc<LampClient<T>>,
    state: Mutex<LampState>,
}

impl<T: Transport> CommandChannel<T> {
    pub fn new(client: Arc<LampClient<T>>) -> CommandChannel<T> {
        CommandChannel {
            client,
            state: Mutex::new(LampState {
                last_color: None,
                is_on: false,
            }),
        }
    }

    /// Sets a static color. Fails with a distinct error when not connected.
    pub async fn send_color(&self, color: &Color) -> Result<()> {
        debug!("Setting color {} ({})", color.name, color.hex);
        self.client.send_frame(&color.command).await?;
        self.client.clock().mark_user_input();
        let mut state = self.state.lock();
        state.last_color = Some(color.clone());
        state.is_on = true;
        Ok(())
    }

    /// Turns the lamp on (replaying the last color, white when none is
    /// known) or off.
    pub async fn send_power(&self, on: bool) -> Result<()> {
        let frame = if on {
            match self.state.lock().last_color.as_ref() {
                Some(color) => color.command,
                None => {
                    warn!("No last color known, powering on with white");
                    color_frame(0xff, 0xff, 0xff)
                }
            }
        } else {
            POWER_OFF_FRAME
        };
        self.client.send_frame(&frame).await?;
        self.client.clock().mark_user_input();
        self.state.lock().is_on = on;
        Ok(())
    }

    /// Sets the brightness (0-100, clamped)
    pub async fn send_brightness(&self, percent: u8) -> Result<()> {
        debug!("Setting brightness to {}%", percent.min(100));
        self.client.send_frame(&brightness_frame(percent)).await?;
        self.client.clock().mark_user_input();
        Ok(())
    }

    /// Last color successfully sent in this session
    pub fn last_color(&self) -> Option<Color> {
        self.state.lock().last_color.clone()
    }

    /// Whether the lamp is believed to be lit
    pub fn is_on(&self) -> bool {
        self.state.lock().is_on
    }
}
