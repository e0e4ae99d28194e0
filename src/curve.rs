//! Piecewise-linear price → quantity curves used for bidding and clearing.
//!
//! Quantities follow the network convention: negative values are
//! production, positive values are consumption. A curve is only ever used
//! through interpolation and is held flat outside its observed price range.

use std::sync::Arc;

/// Fixed price step between the "off" and "on" knees of adjustable curves.
pub const PRICE_STEP: f64 = 0.01;

/// Tolerance used when looking for an exact quantity match in [`Curve::price_at`].
pub const QUANTITY_EPSILON: f64 = 1e-9;

/// Two prices closer than this are the same key.
const KEY_EPSILON: f64 = 1e-12;

/// One breakpoint of a curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub price: f64,
    pub quantity: f64,
}

/// Immutable piecewise-linear function from price to signed quantity.
///
/// Breakpoints are kept sorted by price with unique keys. Cloning is cheap:
/// the breakpoints are shared, and every operation that changes a curve
/// returns a new one.
///
/// # Examples
///
/// ```
/// use flownet_sim::curve::Curve;
///
/// let curve = Curve::builder().set(0.0, 10.0).set(1.0, -10.0).build();
/// assert_eq!(curve.value_at(0.5), 0.0);
/// assert_eq!(curve.price_at(0.0), 0.5);
/// ```
#[derive(Debug, Clone)]
pub struct Curve {
    points: Arc<[Point]>,
}

impl Default for Curve {
    fn default() -> Self {
        Self {
            points: Arc::from(Vec::new()),
        }
    }
}

impl Curve {
    /// Starts an empty mutable builder.
    pub fn builder() -> CurveBuilder {
        CurveBuilder::default()
    }

    /// The empty curve, which evaluates to zero everywhere.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Builds a curve from arbitrary breakpoints; later duplicates win.
    pub fn from_points(points: impl IntoIterator<Item = Point>) -> Self {
        points
            .into_iter()
            .fold(Self::builder(), |b, p| b.set(p.price, p.quantity))
            .build()
    }

    /// Flat curve `{price_min: quantity, price_max: quantity}`.
    pub fn inflexible(quantity: f64, price_min: f64, price_max: f64) -> Self {
        Self::builder()
            .set(price_min, quantity)
            .set(price_max, quantity)
            .build()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Lowest and highest price keys, if any.
    pub fn domain(&self) -> Option<(f64, f64)> {
        Some((self.points.first()?.price, self.points.last()?.price))
    }

    /// Quantity at `price`, interpolating linearly between breakpoints.
    ///
    /// Outside the observed price range the nearest boundary value is
    /// returned. The empty curve is zero everywhere.
    pub fn value_at(&self, price: f64) -> f64 {
        let pts = &self.points;
        let (Some(first), Some(last)) = (pts.first(), pts.last()) else {
            return 0.0;
        };
        if price <= first.price {
            return first.quantity;
        }
        if price >= last.price {
            return last.quantity;
        }

        // first index with a key above `price`; lies in 1..len here
        let idx = pts.partition_point(|p| p.price <= price);
        let (a, b) = (pts[idx - 1], pts[idx]);
        let span = b.price - a.price;
        if span.abs() < KEY_EPSILON {
            return b.quantity;
        }
        a.quantity + (price - a.price) * (b.quantity - a.quantity) / span
    }

    /// Price at which the curve reaches `quantity`, see [`Curve::price_at_within`].
    pub fn price_at(&self, quantity: f64) -> f64 {
        self.price_at_within(quantity, QUANTITY_EPSILON)
    }

    /// Inverse lookup with an explicit match tolerance.
    ///
    /// Returns the first key whose value equals `quantity` within `epsilon`,
    /// otherwise interpolates inside the first bracketing pair of keys. When
    /// `quantity` lies outside the curve's values, the key with the nearest
    /// value is returned. The empty curve answers `0.0`.
    pub fn price_at_within(&self, quantity: f64, epsilon: f64) -> f64 {
        let pts = &self.points;

        if let Some(hit) = pts.iter().find(|p| (p.quantity - quantity).abs() <= epsilon) {
            return hit.price;
        }

        for pair in pts.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if (a.quantity - quantity) * (b.quantity - quantity) < 0.0 {
                return a.price
                    + (quantity - a.quantity) * (b.price - a.price) / (b.quantity - a.quantity);
            }
        }

        pts.iter()
            .min_by(|a, b| {
                (a.quantity - quantity)
                    .abs()
                    .total_cmp(&(b.quantity - quantity).abs())
            })
            .map_or(0.0, |p| p.price)
    }

    /// Pointwise sum over the union of both curves' price keys.
    pub fn sum(&self, other: &Curve) -> Curve {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }

        let mut keys: Vec<f64> = self
            .points
            .iter()
            .chain(other.points.iter())
            .map(|p| p.price)
            .collect();
        keys.sort_by(f64::total_cmp);
        keys.dedup_by(|a, b| (*a - *b).abs() < KEY_EPSILON);

        let points: Vec<Point> = keys
            .into_iter()
            .map(|price| Point {
                price,
                quantity: self.value_at(price) + other.value_at(price),
            })
            .collect();
        Curve {
            points: Arc::from(points),
        }
    }
}

/// Mutable staging area for a [`Curve`].
#[derive(Debug, Clone, Default)]
pub struct CurveBuilder {
    points: Vec<Point>,
}

impl CurveBuilder {
    /// Sets the quantity at `price`, replacing an existing key.
    pub fn set(mut self, price: f64, quantity: f64) -> Self {
        self.insert(price, quantity);
        self
    }

    /// In-place variant of [`CurveBuilder::set`].
    pub fn insert(&mut self, price: f64, quantity: f64) {
        let idx = self.points.partition_point(|p| p.price < price - KEY_EPSILON);
        match self.points.get_mut(idx) {
            Some(p) if (p.price - price).abs() < KEY_EPSILON => p.quantity = quantity,
            _ => self.points.insert(idx, Point { price, quantity }),
        }
    }

    pub fn build(self) -> Curve {
        Curve {
            points: Arc::from(self.points),
        }
    }
}
