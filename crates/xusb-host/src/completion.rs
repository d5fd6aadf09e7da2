//! Completion classification and bulk sequence-number tracking.
//!
//! A submission finishes with one completion-queue entry whose sub-kind says whether the endpoint
//! completed, errored or is not ready. Endpoint errors are refined by the transfer event TRB the
//! controller posts to the event queue. Everything is finally folded into [`ErrorClass`], the only
//! distinction the retry loops above care about.

use crate::context::EndpointKind;
use crate::error::XusbError;
use crate::regs::subkind;
use crate::trb::{CompletionCode, Trb, TrbType};

/// `HS_BI_COMPLQ_DWRD0.SUBKIND` decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionSubKind {
    NoActivity,
    EndpointDone,
    EndpointError,
    EndpointNotReady,
    OperationError,
    StopRequest,
    Unknown(u8),
}

impl CompletionSubKind {
    pub const fn from_raw(raw: u32) -> Self {
        match raw & subkind::MASK {
            subkind::NO_ACTIVITY => CompletionSubKind::NoActivity,
            subkind::EPT_DONE => CompletionSubKind::EndpointDone,
            subkind::EPT_ERROR => CompletionSubKind::EndpointError,
            subkind::EPT_NRDY => CompletionSubKind::EndpointNotReady,
            subkind::OP_ERROR => CompletionSubKind::OperationError,
            subkind::STOPREQ => CompletionSubKind::StopRequest,
            other => CompletionSubKind::Unknown(other as u8),
        }
    }
}

/// Raw outcome of one work-queue submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    Success,
    Stalled,
    NotReady,
    DeviceError,
    Timeout,
    /// The endpoint reported an error; the event queue holds the details.
    EndpointError,
}

impl Completion {
    /// Converts a resolved completion into a transfer result.
    ///
    /// `EndpointError` must be refined through the event queue first; if it reaches this point it
    /// is treated as retryable.
    pub fn into_result(self) -> Result<(), XusbError> {
        match self {
            Completion::Success => Ok(()),
            Completion::Stalled => Err(XusbError::Stalled),
            Completion::NotReady => Err(XusbError::NotReady),
            Completion::DeviceError => Err(XusbError::DeviceResponse),
            Completion::Timeout => Err(XusbError::Timeout),
            Completion::EndpointError => Err(XusbError::Retry),
        }
    }
}

/// Transfer-level taxonomy driving every retry decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Success,
    Stalled,
    Retry,
    Fatal,
}

impl ErrorClass {
    pub fn of<T>(result: &Result<T, XusbError>) -> Self {
        match result {
            Ok(_) => ErrorClass::Success,
            Err(e) => e.class(),
        }
    }
}

/// Refines an endpoint error using the transfer event TRB read from the event queue.
///
/// Only Event Data TRBs carry a meaningful completion code; anything else is treated as a USB
/// transaction error.
pub fn classify_event(trb: &Trb) -> (CompletionCode, Result<(), XusbError>) {
    if trb.trb_type() != TrbType::EventData {
        return (CompletionCode::UsbTransactionError, Err(XusbError::Retry));
    }
    let code = trb.completion_code();
    let result = match code {
        CompletionCode::Success => Ok(()),
        CompletionCode::Stall => Err(XusbError::Stalled),
        CompletionCode::UsbTransactionError => Err(XusbError::Retry),
        other => Err(XusbError::Completion(other)),
    };
    (code, result)
}

/// Bulk data-toggle sequence numbers, carried between submissions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SequenceNumbers {
    pub bulk_in: u8,
    pub bulk_out: u8,
}

impl SequenceNumbers {
    pub fn get(&self, kind: EndpointKind) -> u8 {
        match kind {
            EndpointKind::BulkIn => self.bulk_in,
            EndpointKind::BulkOut => self.bulk_out,
            EndpointKind::Control => 0,
        }
    }

    /// Records the sequence number after a finished bulk transfer: the controller's value on
    /// success, 0 after a stall. Control transfers leave both counters untouched.
    pub fn update(&mut self, kind: EndpointKind, stalled: bool, context_seq: u8) {
        let next = if stalled { 0 } else { context_seq };
        match kind {
            EndpointKind::BulkIn => self.bulk_in = next,
            EndpointKind::BulkOut => self.bulk_out = next,
            EndpointKind::Control => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stall_resets_only_the_affected_direction() {
        let mut seq = SequenceNumbers {
            bulk_in: 5,
            bulk_out: 9,
        };
        seq.update(EndpointKind::BulkIn, true, 7);
        assert_eq!(seq.bulk_in, 0);
        assert_eq!(seq.bulk_out, 9);

        seq.update(EndpointKind::BulkOut, false, 10);
        assert_eq!(seq.bulk_out, 10);

        seq.update(EndpointKind::Control, false, 3);
        assert_eq!(seq, SequenceNumbers { bulk_in: 0, bulk_out: 10 });
    }

    #[test]
    fn event_codes_map_to_classes() {
        let ev = |code| Trb::transfer_event(TrbType::EventData, code, 0, 1, 1);

        let (code, r) = classify_event(&ev(CompletionCode::Stall));
        assert_eq!(code, CompletionCode::Stall);
        assert_eq!(ErrorClass::of(&r), ErrorClass::Stalled);

        let (_, r) = classify_event(&ev(CompletionCode::UsbTransactionError));
        assert_eq!(ErrorClass::of(&r), ErrorClass::Retry);

        let (_, r) = classify_event(&ev(CompletionCode::BabbleDetected));
        assert_eq!(r, Err(XusbError::Completion(CompletionCode::BabbleDetected)));
        assert_eq!(ErrorClass::of(&r), ErrorClass::Fatal);
    }

    #[test]
    fn non_event_data_trb_is_a_transaction_error() {
        let trb = Trb::transfer_event(TrbType::TransferEvent, CompletionCode::Stall, 0, 1, 1);
        let (code, r) = classify_event(&trb);
        assert_eq!(code, CompletionCode::UsbTransactionError);
        assert_eq!(r, Err(XusbError::Retry));
    }

    #[test]
    fn transient_completions_are_retryable() {
        for c in [Completion::Timeout, Completion::DeviceError, Completion::NotReady] {
            assert_eq!(ErrorClass::of(&c.into_result()), ErrorClass::Retry);
        }
        assert_eq!(
            ErrorClass::of(&Completion::Stalled.into_result()),
            ErrorClass::Stalled
        );
    }
}
