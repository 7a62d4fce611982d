//! Pin-mux engine.
//!
//! Executes a [`Routing`]'s recipe of GPIO actions that steer a physical
//! pin to the requested function. Consecutive steps on the same control pin
//! share one raw GPIO context. A failing step aborts the recipe; steps that
//! already ran are not rolled back.

use crate::board::{MuxCommand, MuxStep, Routing};
use crate::hal::gpio::{Direction, DriveMode};
use crate::peripheral::gpio::Gpio;
use crate::registry::Session;
use log::{debug, error, warn};
use xpt_common::{Result, XptError};

/// Run the mux recipe of `routing`.
pub fn apply(session: &Session, routing: &Routing) -> Result<()> {
    let mut current: Option<Gpio> = None;

    for step in routing.mux() {
        match step.command {
            MuxCommand::Skip => continue,
            MuxCommand::Unknown(code) => {
                warn!("mux: unknown command {} on pin {}, skipped", code, step.pin);
                continue;
            }
            _ => {}
        }

        let gpio = match current.take() {
            Some(gpio) if gpio.pin_raw() == step.pin => current.insert(gpio),
            previous => {
                if let Some(gpio) = previous {
                    release(gpio);
                }
                let gpio = Gpio::init_raw(session, step.pin).map_err(|err| {
                    error!("mux: failed to open control pin {}: {}", step.pin, err);
                    XptError::InvalidHandle
                })?;
                current.insert(gpio)
            }
        };

        if let Err(err) = run_step(gpio, step) {
            error!("mux: {:?} on pin {} failed: {}", step.command, step.pin, err);
            if let Some(gpio) = current.take() {
                release(gpio);
            }
            return Err(XptError::InvalidResource);
        }
    }

    if let Some(gpio) = current.take() {
        release(gpio);
    }
    Ok(())
}

fn run_step(gpio: &mut Gpio, step: &MuxStep) -> Result<()> {
    let value = step.value as i32;
    match step.command {
        MuxCommand::Undefined => {
            if let Err(err) = gpio.dir(Direction::Out) {
                debug!("mux: pin {} direction ignored: {}", step.pin, err);
            }
            gpio.write(value)
        }
        MuxCommand::SetValue => gpio.write(value),
        MuxCommand::SetDirection => gpio.dir(Direction::try_from(step.value)?),
        MuxCommand::SetInValue => {
            gpio.dir(Direction::In)?;
            gpio.write(value)
        }
        MuxCommand::SetOutValue => {
            gpio.dir(Direction::Out)?;
            gpio.write(value)
        }
        MuxCommand::SetMode => gpio.mode(DriveMode::try_from(step.value)?),
        MuxCommand::Skip | MuxCommand::Unknown(_) => Ok(()),
    }
}

/// Leave the control pin exported for the function it now selects.
fn release(mut gpio: Gpio) {
    gpio.owner(false);
    if let Err(err) = gpio.close() {
        debug!("mux: closing control pin failed: {}", err);
    }
}
