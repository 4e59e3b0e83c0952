/// Hard ceiling the messaging provider imposes on callback data. Buttons
/// whose encoded routing would exceed this are dropped by the sender in
/// favor of a button-less message.
pub const MAX_CALLBACK_DATA_BYTES: usize = 64;

/// Typed form of the routing strings carried in inline buttons. Parsed once
/// at the dispatch boundary; everything past that point works on the
/// variant, never on the raw string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    InitiatePayment { debtor_id: i64, lender_id: i64 },
    ConfirmPayment { confirmation_id: i64 },
    RejectPayment { confirmation_id: i64 },
}

impl CallbackAction {
    /// Parses a routing string of the form `action:arg1[:arg2]`. Unknown
    /// actions and malformed arguments yield None, which dispatch treats
    /// as a logged no-op rather than an error.
    pub fn parse(data: &str) -> Option<Self> {
        let mut parts = data.split(':');
        let action = parts.next()?;

        match action {
            "initiate_payment" => {
                let debtor_id = parts.next()?.parse().ok()?;
                let lender_id = parts.next()?.parse().ok()?;
                if parts.next().is_some() {
                    return None;
                }
                Some(CallbackAction::InitiatePayment {
                    debtor_id,
                    lender_id,
                })
            }
            "confirm_payment" => {
                let confirmation_id = parts.next()?.parse().ok()?;
                if parts.next().is_some() {
                    return None;
                }
                Some(CallbackAction::ConfirmPayment { confirmation_id })
            }
            "reject_payment" => {
                let confirmation_id = parts.next()?.parse().ok()?;
                if parts.next().is_some() {
                    return None;
                }
                Some(CallbackAction::RejectPayment { confirmation_id })
            }
            _ => None,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            CallbackAction::InitiatePayment {
                debtor_id,
                lender_id,
            } => format!("initiate_payment:{debtor_id}:{lender_id}"),
            CallbackAction::ConfirmPayment { confirmation_id } => {
                format!("confirm_payment:{confirmation_id}")
            }
            CallbackAction::RejectPayment { confirmation_id } => {
                format!("reject_payment:{confirmation_id}")
            }
        }
    }

    /// Encoded routing string, or None when it would not fit in a button.
    pub fn encode_for_button(&self) -> Option<String> {
        let encoded = self.encode();
        if encoded.len() <= MAX_CALLBACK_DATA_BYTES {
            Some(encoded)
        } else {
            None
        }
    }
}
