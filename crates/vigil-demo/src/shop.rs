//! A toy order pipeline with probe sites worth attaching to.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vigil_debugger::{probe, Capture, Debugger, Object, Value};

const CATALOG: &[(&str, u32)] = &[
    ("tea", 350),
    ("cake", 425),
    ("scone", 275),
    ("jam", 190),
    ("teapot", 2_400),
];

const CUSTOMERS: &[&str] = &["ada", "grace", "linus", "barbara", "ken"];

#[derive(Debug, Clone)]
pub struct LineItem {
    pub sku: &'static str,
    pub quantity: u32,
    pub unit_cents: u32,
}

impl Capture for LineItem {
    fn capture(&self) -> Value {
        Object::new("LineItem")
            .with_field("sku", self.sku)
            .with_field("quantity", self.quantity)
            .with_field("unit_cents", self.unit_cents)
            .into()
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: u64,
    pub customer: &'static str,
    pub items: Vec<LineItem>,
    pub coupon: Option<&'static str>,
}

impl Capture for Order {
    fn capture(&self) -> Value {
        Object::new("Order")
            .with_field("id", self.id)
            .with_field("customer", self.customer)
            .with_field("items", &self.items)
            .with_field("coupon", self.coupon)
            .into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted { total_cents: u32 },
    Rejected,
}

pub struct Shop {
    rng: StdRng,
    credit_limit_cents: u32,
}

impl Shop {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            credit_limit_cents: 10_000,
        }
    }

    pub fn next_order(&mut self, id: u64) -> Order {
        let count = self.rng.gen_range(1..=4);
        let items = (0..count)
            .map(|_| {
                let (sku, unit_cents) = CATALOG[self.rng.gen_range(0..CATALOG.len())];
                LineItem {
                    sku,
                    quantity: self.rng.gen_range(1..=3),
                    unit_cents,
                }
            })
            .collect();
        Order {
            id,
            customer: CUSTOMERS[self.rng.gen_range(0..CUSTOMERS.len())],
            items,
            coupon: self.rng.gen_bool(0.2).then_some("SPRING10"),
        }
    }

    pub fn process(&self, debugger: &Debugger, order: &Order) -> Outcome {
        let subtotal = subtotal(order);
        let discount = match order.coupon {
            Some(_) => subtotal / 10,
            None => 0,
        };
        let total_cents = subtotal - discount;
        probe!(debugger, order, subtotal, discount, total_cents);

        if total_cents > self.credit_limit_cents {
            let limit = self.credit_limit_cents;
            probe!(debugger, order, total_cents, limit);
            tracing::debug!(target: "vigil.demo", order_id = order.id, total_cents, "order rejected");
            return Outcome::Rejected;
        }
        Outcome::Accepted { total_cents }
    }
}

fn subtotal(order: &Order) -> u32 {
    order
        .items
        .iter()
        .map(|item| item.quantity * item.unit_cents)
        .sum()
}
