//! Getting the device back to a known screen.
//!
//! Every routine here is best effort: each loop is capped and the last
//! resort is closing and reopening the title.

use super::{TradeSession, WorkerSessionState};
use crate::title::Title;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};
use trade_common::{Button, DeviceError};

const OVERWORLD_ATTEMPTS: u32 = 30;
const PORTAL_EXIT_ATTEMPTS: u32 = 30;
const PORTAL_LOAD_POLLS: u32 = 20;
const ONLINE_POLLS: u32 = 30;
const BOX_EXIT_ATTEMPTS: u32 = 20;
const PORTAL_RETURN_POLLS: u32 = 40;
const REOPEN_POLLS: u32 = 60;

impl<T: Title> TradeSession<T> {
    /// Back out to the overworld, restarting the title if that fails.
    pub(crate) async fn recover_to_overworld(&mut self) -> Result<(), DeviceError> {
        if self.title.is_on_overworld(&self.offsets).await? {
            return Ok(());
        }
        self.set_phase(super::Phase::Recover);
        info!(worker = %self.worker, "Attempting to recover to overworld");

        let mut attempts = 0;
        while !self.title.is_on_overworld(&self.offsets).await? {
            attempts += 1;
            if attempts >= OVERWORLD_ATTEMPTS {
                break;
            }
            self.click(Button::B, 1_300).await?;
            if self.title.is_on_overworld(&self.offsets).await? {
                break;
            }
            self.click(Button::B, 2_000).await?;
            if self.title.is_on_overworld(&self.offsets).await? {
                break;
            }
            self.click(Button::A, 1_300).await?;
        }

        if !self.title.is_on_overworld(&self.offsets).await? {
            warn!(worker = %self.worker, "Failed to recover to overworld, rebooting the game");
            self.restart_game().await?;
        }
        sleep(Duration::from_secs(1)).await;
        self.state.reset_flags();
        Ok(())
    }

    /// Leave the portal and walk straight back in. Returns whether the
    /// cursor ended up on link trade.
    pub(crate) async fn recover_to_portal(&mut self) -> Result<bool, DeviceError> {
        self.set_phase(super::Phase::Recover);
        info!(worker = %self.worker, "Reorienting to the trade portal");
        let mut attempts = 0;
        while self.title.is_in_portal(&self.offsets).await? {
            self.click(Button::B, 1_500).await?;
            attempts += 1;
            if attempts >= PORTAL_EXIT_ATTEMPTS {
                warn!(worker = %self.worker, "Failed to recover to the trade portal");
                return Ok(false);
            }
        }

        // On the menu, hovering the portal.
        self.click(Button::A, 1_000).await?;
        self.set_up_portal_cursor().await
    }

    /// From the overworld: open the menu, get online and enter the portal.
    pub(crate) async fn connect_and_enter_portal(&mut self) -> Result<bool, DeviceError> {
        if !self.title.is_on_overworld(&self.offsets).await? {
            self.recover_to_overworld().await?;
        }

        info!(worker = %self.worker, "Opening the trade portal");
        self.click(Button::X, 1_000).await?;
        self.dismiss_news(2_000).await?;

        // Scroll to the bottom so optional menu entries don't shift the cursor.
        self.click(Button::DRight, 300).await?;
        self.press_and_hold(Button::DDown, 1_000, 1_000).await?;
        for _ in 0..3 {
            self.click(Button::DUp, 200).await?;
        }
        self.click(Button::A, 1_000).await?;

        self.set_up_portal_cursor().await
    }

    async fn dismiss_news(&self, settle_ms: u64) -> Result<(), DeviceError> {
        let news = self.title.news_applet_id();
        if self.title.device().is_process_running(news).await? {
            info!(worker = %self.worker, "News detected, closing it once loaded");
            sleep(Duration::from_secs(5)).await;
            self.click(Button::B, settle_ms).await?;
        }
        Ok(())
    }

    /// Wait for the portal to load, get online and move to link trade.
    async fn set_up_portal_cursor(&mut self) -> Result<bool, DeviceError> {
        let mut polls = 0;
        while !self.title.is_in_portal(&self.offsets).await? {
            sleep(Duration::from_millis(500)).await;
            polls += 1;
            if polls > PORTAL_LOAD_POLLS {
                warn!(worker = %self.worker, "Failed to load the trade portal");
                return Ok(false);
            }
        }
        let load_portal = self.config().timings.extra_time_load_portal_ms;
        sleep(Duration::from_millis(2_000 + load_portal)).await;

        if !self.connect_to_online().await? {
            warn!(worker = %self.worker, "Failed to connect online");
            return Ok(false);
        }
        self.dismiss_news(2_000 + load_portal).await?;

        self.click(Button::DDown, 300).await?;
        self.click(Button::DDown, 300).await?;
        Ok(true)
    }

    async fn connect_to_online(&self) -> Result<bool, DeviceError> {
        if self.title.is_online(&self.offsets).await? {
            return Ok(true);
        }

        self.click(Button::L, 1_000).await?;
        self.click(Button::A, 4_000).await?;
        let mut polls = 0;
        while !self.title.is_online(&self.offsets).await? {
            sleep(Duration::from_millis(500)).await;
            polls += 1;
            if polls > ONLINE_POLLS {
                return Ok(false);
            }
        }

        let settle = self.config().timings.extra_time_connect_online_ms;
        sleep(Duration::from_millis(3_000 + settle)).await;
        self.click(Button::A, 1_000).await?;
        Ok(true)
    }

    /// Leave the trade box and wait for the portal to come back.
    pub(crate) async fn exit_trade_to_portal(&mut self, unexpected: bool) -> Result<(), DeviceError> {
        if self.title.is_in_portal(&self.offsets).await? {
            return Ok(());
        }
        if unexpected {
            warn!(worker = %self.worker, "Unexpected behavior, recovering to portal");
        }

        info!(worker = %self.worker, "Leaving the box");
        let mut attempts = 0;
        'leave: while self.title.is_in_box(&self.offsets).await? {
            for button in [Button::B, Button::A, Button::B] {
                self.click(button, 1_000).await?;
                if !self.title.is_in_box(&self.offsets).await? {
                    sleep(Duration::from_secs(5)).await;
                    break 'leave;
                }
            }
            attempts += 1;
            if attempts > BOX_EXIT_ATTEMPTS {
                warn!(worker = %self.worker, "Failed to exit box, rebooting the game");
                return self.reset_into_portal().await;
            }
        }

        info!(worker = %self.worker, "Waiting on the portal to load");
        let mut polls = 0;
        while !self.title.is_in_portal(&self.offsets).await? {
            sleep(Duration::from_secs(1)).await;
            if self.title.is_in_portal(&self.offsets).await? {
                break;
            }
            polls += 1;
            if polls > PORTAL_RETURN_POLLS {
                warn!(worker = %self.worker, "Failed to load the portal, rebooting the game");
                return self.reset_into_portal().await;
            }
        }
        sleep(Duration::from_secs(2)).await;
        Ok(())
    }

    async fn reset_into_portal(&mut self) -> Result<(), DeviceError> {
        self.recover_to_overworld().await?;
        self.connect_and_enter_portal().await?;
        Ok(())
    }

    /// Close and reopen the title, then re-cache offsets.
    pub(crate) async fn restart_game(&mut self) -> Result<(), DeviceError> {
        info!(worker = %self.worker, "Restarting the game");
        self.click(Button::Home, 2_000).await?;
        self.click(Button::X, 1_000).await?;
        self.click(Button::A, 5_000).await?;
        self.click(Button::A, 1_000).await?;
        sleep(Duration::from_millis(self.config().timings.extra_time_reopen_game_ms)).await;

        self.offsets = self.title.resolve_offsets().await?;
        let mut polls = 0;
        while !self.title.is_on_overworld(&self.offsets).await? {
            polls += 1;
            if polls > REOPEN_POLLS {
                warn!(worker = %self.worker, "Title did not return to the overworld after reopening");
                break;
            }
            self.click(Button::A, 1_000).await?;
        }

        self.state = WorkerSessionState::default();
        info!(worker = %self.worker, "Back in the overworld");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests_support::session_on;
    use trade_common::mock_device::Screen;

    #[tokio::test(start_paused = true)]
    async fn frozen_console_is_restarted_back_to_overworld() {
        let (console, mut session) = session_on(Screen::Overworld).await;
        console.freeze();

        session.recover_to_overworld().await.unwrap();

        assert_eq!(console.screen(), Screen::Overworld);
        assert_eq!(console.restarts(), 1);
        assert!(session.state().start_from_overworld);
    }

    #[tokio::test(start_paused = true)]
    async fn menu_backs_out_without_restart() {
        let (console, mut session) = session_on(Screen::Menu).await;

        session.recover_to_overworld().await.unwrap();

        assert_eq!(console.screen(), Screen::Overworld);
        assert_eq!(console.restarts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_and_enter_portal_goes_online_and_closes_news() {
        let (console, mut session) = session_on(Screen::Overworld).await;
        console.show_news();

        assert!(session.connect_and_enter_portal().await.unwrap());

        assert!(console.is_online());
        assert_eq!(console.screen(), Screen::Portal);
    }

    #[tokio::test(start_paused = true)]
    async fn portal_setup_fails_when_connection_is_refused() {
        let (console, mut session) = session_on(Screen::Overworld).await;
        console.set_can_connect(false);

        assert!(!session.connect_and_enter_portal().await.unwrap());
        assert!(!console.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn recover_to_portal_reenters_from_search() {
        let (console, mut session) = session_on(Screen::Searching).await;
        console.set_online(true);

        assert!(session.recover_to_portal().await.unwrap());
        assert_eq!(console.screen(), Screen::Portal);
    }
}
