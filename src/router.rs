//! Dispatch of raw scale notifications.
//!
//! Time notifications go to the clock check, everything else is treated as
//! weight data: a leading stop marker ends a history transfer, 20-byte
//! payloads carry two history records and 10-byte payloads a single reading.
//! Other lengths are keep-alives and ignored.

use crate::pipeline::{Outcome, PublicationPipeline};
use crate::protocol::{
    Clock, STOP_ACK, STOP_MARKER, TimeCorrection, TimeFrame, WEIGHT_FRAME_LEN, WeightFrame,
    user_identifier_frame,
};
use crate::transport::{RawNotification, ScaleCharacteristic, ScaleSession, TransportError};
use log::{debug, info, warn};

const HISTORY_BURST_LEN: usize = 2 * WEIGHT_FRAME_LEN;

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

/// Routes notifications to the decoders and the publication pipeline.
pub struct NotificationRouter {
    user_identifier: u16,
    clock: Box<dyn Clock>,
}

impl NotificationRouter {
    pub fn new(user_identifier: u16, clock: Box<dyn Clock>) -> Self {
        Self {
            user_identifier,
            clock,
        }
    }

    /// Handle one notification.
    ///
    /// Returns what happened to each weight frame it carried. Only failed
    /// writes to the scale are errors; undecodable data is logged and dropped.
    pub async fn route(
        &self,
        notification: &RawNotification,
        session: &dyn ScaleSession,
        pipeline: &mut PublicationPipeline,
    ) -> Result<Vec<Outcome>, TransportError> {
        let payload = notification.payload.as_slice();

        if notification.characteristic == ScaleCharacteristic::CurrentTime {
            self.sync_time(payload, session).await?;
            return Ok(Vec::new());
        }

        if payload.first() == Some(&STOP_MARKER) {
            debug!("Processing stop signal");
            session
                .write(ScaleCharacteristic::WeightHistory, STOP_ACK.to_vec())
                .await?;
            session
                .write(
                    ScaleCharacteristic::WeightHistory,
                    user_identifier_frame(self.user_identifier).to_vec(),
                )
                .await?;
        }

        let outcomes = match payload.len() {
            HISTORY_BURST_LEN => {
                debug!("Processing history notification");
                payload
                    .chunks_exact(WEIGHT_FRAME_LEN)
                    .filter_map(|frame| Self::route_frame(frame, pipeline))
                    .collect()
            }
            WEIGHT_FRAME_LEN => {
                debug!("Processing single data notification");
                Self::route_frame(payload, pipeline).into_iter().collect()
            }
            len => {
                if len > 0 {
                    debug!("Ignoring {len}-byte notification: {}", hex(payload));
                }
                Vec::new()
            }
        };

        Ok(outcomes)
    }

    fn route_frame(data: &[u8], pipeline: &mut PublicationPipeline) -> Option<Outcome> {
        debug!("Processing weight data: {}", hex(data));
        match WeightFrame::decode(data) {
            Ok(frame) => Some(pipeline.process(frame.measurement())),
            Err(e) => {
                warn!("Dropping weight frame: {e}");
                None
            }
        }
    }

    /// Compare the scale date with the host and correct it when they differ.
    ///
    /// Returns the correction that was written, if any.
    pub async fn sync_time(
        &self,
        payload: &[u8],
        session: &dyn ScaleSession,
    ) -> Result<Option<TimeCorrection>, TransportError> {
        debug!("Processing time synchronization request");
        let frame = match TimeFrame::decode(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping time notification: {e}");
                return Ok(None);
            }
        };

        let Some(correction) = frame.correction(self.clock.now()) else {
            return Ok(None);
        };

        info!("Date is incorrect, updating date on the MiScale");
        debug!(
            "Current date on MiScale is: {:04}-{:02}-{:02}",
            frame.year, frame.month, frame.day
        );
        session
            .write(
                ScaleCharacteristic::CurrentTime,
                correction.to_bytes().to_vec(),
            )
            .await?;
        debug!("MiScale date updated with current date and time");

        Ok(Some(correction))
    }
}
