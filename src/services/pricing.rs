use serde::{Deserialize, Serialize};

/// Sales tax applied to the subtotal, in percent
pub const TAX_PERCENT: i64 = 10;
/// Express delivery fee in cents; standard delivery is free
pub const EXPRESS_SHIPPING_CENTS: i64 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShippingMethod {
    #[default]
    Standard,
    Express,
}

impl ShippingMethod {
    pub fn fee_cents(self) -> i64 {
        match self {
            ShippingMethod::Standard => 0,
            ShippingMethod::Express => EXPRESS_SHIPPING_CENTS,
        }
    }
}

/// Checkout price preview. All amounts are in cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutQuote {
    pub subtotal: i64,
    pub tax: i64,
    pub shipping: i64,
    pub promo_code: Option<String>,
    pub discount_percent: Option<i16>,
    pub discount: i64,
    pub grand_total: i64,
    /// A code was supplied but could not be applied
    pub promo_rejected: bool,
}

/// `amount * percent / 100`, rounded half up
fn percent_of(amount: i64, percent: i64) -> i64 {
    (amount * percent + 50).div_euclid(100)
}

impl CheckoutQuote {
    /// The discount applies to the whole order, tax and shipping included.
    pub fn compute(
        subtotal: i64,
        shipping_method: ShippingMethod,
        promo: Option<(String, i16)>,
    ) -> Self {
        let tax = percent_of(subtotal, TAX_PERCENT);
        let shipping = shipping_method.fee_cents();
        let gross = subtotal + tax + shipping;

        let (promo_code, discount_percent, discount) = match promo {
            Some((code, percent)) => {
                let discount = percent_of(gross, i64::from(percent));
                (Some(code), Some(percent), discount)
            }
            None => (None, None, 0),
        };

        Self {
            subtotal,
            tax,
            shipping,
            promo_code,
            discount_percent,
            discount,
            grand_total: gross - discount,
            promo_rejected: false,
        }
    }

    pub(crate) fn rejected(mut self) -> Self {
        self.promo_rejected = true;
        self
    }
}
