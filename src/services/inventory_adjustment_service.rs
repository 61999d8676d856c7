use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use validator::{Validate, ValidationError};

use crate::{
    entities::MovementType,
    errors::ServiceError,
    services::inventory::{AdjustRequest, InventoryService, MovementRecord},
};

/// Why an operator is changing stock by hand. Decides the sign of the delta.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    Received,
    ReturnedToStock,
    SoldManually,
    Damaged,
    /// Stock count correction. The quantity is applied with the sign given.
    Correction,
}

impl AdjustmentReason {
    /// `None` when the magnitude does not fit in an `i64`.
    pub fn signed_delta(self, quantity: i64) -> Option<i64> {
        match self {
            AdjustmentReason::Received | AdjustmentReason::ReturnedToStock => quantity.checked_abs(),
            AdjustmentReason::SoldManually | AdjustmentReason::Damaged => {
                quantity.checked_abs().map(|magnitude| -magnitude)
            }
            AdjustmentReason::Correction => Some(quantity),
        }
    }
}

/// Administrative stock change entered by an operator.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ManualAdjustment {
    pub variant_id: i64,
    /// Defaults to the default location when absent.
    pub location_id: Option<i64>,
    pub reason: AdjustmentReason,
    #[validate(custom = "validate_quantity")]
    pub quantity: i64,
    #[validate(length(max = 255))]
    pub reference: Option<String>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

fn validate_quantity(quantity: i64) -> Result<(), ValidationError> {
    if quantity == 0 {
        let mut err = ValidationError::new("non_zero");
        err.message = Some("quantity cannot be zero".into());
        return Err(err);
    }
    if quantity == i64::MIN {
        let mut err = ValidationError::new("range");
        err.message = Some("quantity out of range".into());
        return Err(err);
    }
    Ok(())
}

pub struct InventoryAdjustmentService {
    inventory: Arc<InventoryService>,
}

impl InventoryAdjustmentService {
    pub fn new(inventory: Arc<InventoryService>) -> Self {
        Self { inventory }
    }

    /// Validates and applies a manual adjustment, surfacing every error to the operator.
    pub async fn apply(&self, adjustment: ManualAdjustment) -> Result<MovementRecord, ServiceError> {
        if adjustment.quantity == 0 {
            return Err(ServiceError::InvalidDelta(
                "quantity cannot be zero".to_string(),
            ));
        }
        adjustment.validate()?;
        let delta = adjustment
            .reason
            .signed_delta(adjustment.quantity)
            .ok_or_else(|| ServiceError::InvalidDelta("quantity out of range".to_string()))?;

        let location_id = match adjustment.location_id {
            Some(id) => id,
            None => self.inventory.resolver().default_location().await?.id,
        };
        let reference = adjustment
            .reference
            .clone()
            .unwrap_or_else(|| format!("Manual adjustment: {}", adjustment.reason));
        let notes = match adjustment.notes {
            Some(notes) => format!("[{}] {}", adjustment.reason, notes),
            None => format!("[{}]", adjustment.reason),
        };

        let request = AdjustRequest::new(
            adjustment.variant_id,
            location_id,
            delta,
            MovementType::Adjustment,
        )
        .with_reference(reference)
        .with_notes(Some(notes));

        let record = self.inventory.adjust(request).await?;

        info!(
            movement_id = record.movement.id,
            reason = %adjustment.reason,
            before = record.quantity_before(),
            after = record.quantity_after(),
            "Manual inventory adjustment applied"
        );

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    #[rstest]
    #[case(AdjustmentReason::Received, 5, 5)]
    #[case(AdjustmentReason::Received, -5, 5)]
    #[case(AdjustmentReason::ReturnedToStock, 2, 2)]
    #[case(AdjustmentReason::SoldManually, 3, -3)]
    #[case(AdjustmentReason::Damaged, -4, -4)]
    #[case(AdjustmentReason::Correction, -7, -7)]
    #[case(AdjustmentReason::Correction, 7, 7)]
    #[case(AdjustmentReason::Received, i64::MAX, i64::MAX)]
    #[case(AdjustmentReason::Damaged, i64::MAX, -i64::MAX)]
    fn reason_decides_sign(
        #[case] reason: AdjustmentReason,
        #[case] quantity: i64,
        #[case] expected: i64,
    ) {
        assert_eq!(reason.signed_delta(quantity), Some(expected));
    }

    #[rstest]
    #[case(AdjustmentReason::Received)]
    #[case(AdjustmentReason::ReturnedToStock)]
    #[case(AdjustmentReason::SoldManually)]
    #[case(AdjustmentReason::Damaged)]
    fn minimum_quantity_has_no_magnitude(#[case] reason: AdjustmentReason) {
        assert_eq!(reason.signed_delta(i64::MIN), None);
    }

    #[test]
    fn minimum_quantity_fails_validation() {
        let adjustment = ManualAdjustment {
            variant_id: 1,
            location_id: Some(1),
            reason: AdjustmentReason::Damaged,
            quantity: i64::MIN,
            reference: None,
            notes: None,
        };
        let err = adjustment.validate().unwrap_err();
        let field_errors = err.field_errors();
        let quantity_errors = field_errors["quantity"];
        assert_eq!(
            quantity_errors[0].message.as_deref(),
            Some("quantity out of range")
        );
    }

    #[test]
    fn reasons_parse_from_cli_strings() {
        assert_eq!(
            AdjustmentReason::from_str("returned_to_stock").unwrap(),
            AdjustmentReason::ReturnedToStock
        );
        assert_eq!(AdjustmentReason::Damaged.to_string(), "damaged");
    }

    #[test]
    fn zero_quantity_fails_validation_with_operator_message() {
        let adjustment = ManualAdjustment {
            variant_id: 1,
            location_id: None,
            reason: AdjustmentReason::Correction,
            quantity: 0,
            reference: None,
            notes: None,
        };
        let err = adjustment.validate().unwrap_err();
        let field_errors = err.field_errors();
        let quantity_errors = field_errors["quantity"];
        assert_eq!(
            quantity_errors[0].message.as_deref(),
            Some("quantity cannot be zero")
        );
    }

    #[test]
    fn overlong_reference_fails_validation() {
        let adjustment = ManualAdjustment {
            variant_id: 1,
            location_id: Some(1),
            reason: AdjustmentReason::Received,
            quantity: 1,
            reference: Some("x".repeat(256)),
            notes: None,
        };
        assert!(adjustment.validate().is_err());
    }
}
