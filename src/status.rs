//! Status vocabularies stored as plain text columns.
//!
//! Rows keep the raw string; these enums are what the handlers write and match on.

use std::{fmt, str::FromStr};

macro_rules! text_status {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => anyhow::bail!("unknown {} `{}`", stringify!($name), other),
                }
            }
        }
    };
}

text_status!(
    /// `orders.payment_status`
    PaymentStatus {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
        Canceled => "canceled",
        Expired => "expired",
    }
);

text_status!(
    /// `orders.order_status` and `batches.status`
    OrderStatus {
        Pending => "pending",
        Paid => "paid",
        Processing => "processing",
        Completed => "completed",
        CompletedWithErrors => "completed_with_errors",
        Failed => "failed",
    }
);

text_status!(
    /// `orders.processing_stage`
    ProcessingStage {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
    }
);

text_status!(
    /// `payments.status`, mirrors the payment intent lifecycle
    PaymentRecordStatus {
        Pending => "pending",
        Succeeded => "succeeded",
        Failed => "failed",
        Canceled => "canceled",
        Refunded => "refunded",
    }
);

text_status!(
    /// `images.processing_status`
    ImageStatus {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Error => "error",
    }
);

text_status!(
    /// `batches.analysis_type`, forwarded to the analysis endpoint
    AnalysisType {
        Lifestyle => "lifestyle",
        Product => "product",
    }
);

impl Default for AnalysisType {
    fn default() -> Self {
        AnalysisType::Lifestyle
    }
}

/// Roll-up of a finished batch.
pub fn batch_outcome(processed: usize, failed: usize) -> (OrderStatus, ProcessingStage) {
    match (processed, failed) {
        (_, 0) => (OrderStatus::Completed, ProcessingStage::Completed),
        (0, _) => (OrderStatus::Failed, ProcessingStage::Failed),
        _ => (OrderStatus::CompletedWithErrors, ProcessingStage::Completed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_round_trip() {
        for s in ["pending", "completed_with_errors", "failed"] {
            assert_eq!(s.parse::<OrderStatus>().unwrap().as_str(), s);
        }
        assert_eq!(ImageStatus::Error.to_string(), "error");
        assert!("done".parse::<ImageStatus>().is_err());
    }

    #[test]
    fn serde_matches_column_text() {
        let json = serde_json::to_string(&OrderStatus::CompletedWithErrors).unwrap();
        assert_eq!(json, "\"completed_with_errors\"");
        let t: AnalysisType = serde_json::from_str("\"product\"").unwrap();
        assert_eq!(t, AnalysisType::Product);
    }

    #[test]
    fn outcome_roll_up() {
        assert_eq!(batch_outcome(4, 0).0, OrderStatus::Completed);
        assert_eq!(batch_outcome(0, 0).0, OrderStatus::Completed);
        assert_eq!(batch_outcome(3, 1).0, OrderStatus::CompletedWithErrors);
        assert_eq!(batch_outcome(0, 2), (OrderStatus::Failed, ProcessingStage::Failed));
    }
}
