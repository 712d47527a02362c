use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ControlError;

/// Raises the operator interrupt. Cheap to clone; hand one to the Ctrl-C handler and one
/// to the keyboard reader.
#[derive(Debug, Clone)]
pub struct InterruptTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl InterruptTrigger {
    pub fn raise(&self) {
        self.tx.send_replace(true);
    }
}

/// Observer side of the operator interrupt. Every timed wait in the control path goes
/// through [`Interrupt::sleep_until`] so an abort is noticed within one wait.
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

pub fn interrupt_pair() -> (InterruptTrigger, Interrupt) {
    let (tx, rx) = watch::channel(false);
    (InterruptTrigger { tx: Arc::new(tx) }, Interrupt { rx })
}

impl Interrupt {
    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    pub fn check(&self) -> Result<(), ControlError> {
        if self.is_raised() {
            return Err(ControlError::ExternalInterrupt);
        }
        Ok(())
    }

    pub async fn sleep(&mut self, d: Duration) -> Result<(), ControlError> {
        self.sleep_until(Instant::now() + d).await
    }

    pub async fn sleep_until(&mut self, deadline: Instant) -> Result<(), ControlError> {
        self.check()?;
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                changed = self.rx.changed() => match changed {
                    Ok(()) => self.check()?,
                    // every trigger dropped: nobody can interrupt us anymore
                    Err(_) => {
                        (&mut sleep).await;
                        return Ok(());
                    }
                },
            }
        }
    }
}
