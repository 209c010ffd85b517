//! Symbolic generation of the large-l̄ series of ln ψ'.
//!
//! With r = e^x the radial equation becomes Ψ'' = (q(x) + l̄²)Ψ,
//! q = e^{2x} W(e^x). Writing Ψ'/Ψ = l̄ + Σ_k a_k l̄^{-k} gives
//! a_1 = q/2 and a_{m+1} = −(a_m' + Σ_{i+j=m} a_i a_j)/2, each a polynomial
//! in q and its x-derivatives. Only ∫a_k dx is needed, so every a_k is
//! reduced modulo total derivatives.

use std::collections::BTreeMap;

/// Sorted derivative orders, e.g. [0, 1, 1] is q·(q')².
pub type Monomial = Vec<u8>;

const DROP_BELOW: f64 = 1e-14;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffPolynomial {
    terms: BTreeMap<Monomial, f64>,
}

impl DiffPolynomial {
    pub fn monomial(orders: &[u8], coefficient: f64) -> Self {
        let mut poly = Self::default();
        poly.add_term(orders.to_vec(), coefficient);
        poly
    }

    fn add_term(&mut self, mut monomial: Monomial, coefficient: f64) {
        monomial.sort_unstable();
        let entry = self.terms.entry(monomial).or_insert(0.0);
        *entry += coefficient;
        if entry.abs() < DROP_BELOW {
            self.terms.retain(|_, c| c.abs() >= DROP_BELOW);
        }
    }

    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> impl Iterator<Item = (&Monomial, f64)> {
        self.terms.iter().map(|(m, &c)| (m, c))
    }

    pub fn coefficient(&self, orders: &[u8]) -> f64 {
        self.terms.get(orders).copied().unwrap_or(0.0)
    }

    /// Highest derivative order appearing anywhere.
    pub fn max_order(&self) -> u8 {
        self.terms
            .keys()
            .filter_map(|m| m.last().copied())
            .max()
            .unwrap_or(0)
    }

    /// d/dx by the product rule.
    pub fn derivative(&self) -> Self {
        let mut out = Self::default();
        for (monomial, &c) in &self.terms {
            for i in 0..monomial.len() {
                let mut next = monomial.clone();
                next[i] += 1;
                out.add_term(next, c);
            }
        }
        out
    }

    pub fn mul(&self, other: &Self) -> Self {
        let mut out = Self::default();
        for (m1, &c1) in &self.terms {
            for (m2, &c2) in &other.terms {
                let mut product = m1.clone();
                product.extend_from_slice(m2);
                out.add_term(product, c1 * c2);
            }
        }
        out
    }

    pub fn add_scaled(&mut self, other: &Self, factor: f64) {
        for (m, &c) in &other.terms {
            self.add_term(m.clone(), factor * c);
        }
    }

    /// Integrates by parts until every monomial has its highest derivative
    /// at least squared. Total derivatives drop out.
    ///
    /// With the top order h appearing once, s copies of h−1 and remainder R,
    /// q_h q_{h−1}^s R = (q_{h−1}^{s+1}/(s+1))' R, which integrates to
    /// −q_{h−1}^{s+1} R'/(s+1).
    pub fn reduce_total_derivatives(&self) -> Self {
        let mut reduced = Self::default();
        let mut work: Vec<(Monomial, f64)> =
            self.terms.iter().map(|(m, &c)| (m.clone(), c)).collect();
        while let Some((monomial, c)) = work.pop() {
            if c.abs() < DROP_BELOW {
                continue;
            }
            let h = match monomial.last() {
                Some(&h) => h,
                None => {
                    reduced.add_term(monomial, c);
                    continue;
                }
            };
            let top_count = monomial.iter().filter(|&&o| o == h).count();
            if h == 0 || top_count >= 2 {
                reduced.add_term(monomial, c);
                continue;
            }
            let below = monomial.iter().filter(|&&o| o == h - 1).count();
            let rest: Monomial = monomial
                .iter()
                .copied()
                .filter(|&o| o != h && o != h - 1)
                .collect();
            if rest.is_empty() {
                continue;
            }
            let rest_derivative = Self::monomial(&rest, 1.0).derivative();
            for (m, c2) in rest_derivative.terms() {
                let mut next = vec![h - 1; below + 1];
                next.extend_from_slice(m);
                next.sort_unstable();
                work.push((next, -c * c2 / (below as f64 + 1.0)));
            }
        }
        reduced
    }
}

/// a_1 ... a_max_order of the Riccati recursion.
pub fn riccati_coefficients(max_order: usize) -> Vec<DiffPolynomial> {
    let mut a: Vec<DiffPolynomial> = vec![DiffPolynomial::default(); max_order + 1];
    if max_order == 0 {
        return Vec::new();
    }
    a[1] = DiffPolynomial::monomial(&[0], 0.5);
    for m in 1..max_order {
        let mut next = DiffPolynomial::default();
        next.add_scaled(&a[m].derivative(), -0.5);
        for i in 1..m {
            next.add_scaled(&a[i].mul(&a[m - i]), -0.5);
        }
        a[m + 1] = next;
    }
    a.into_iter().skip(1).collect()
}

/// Non-vanishing integrands ∫a_k dx up to `max_order`, as (k, polynomial).
pub fn wkb_integrands(max_order: usize) -> Vec<(usize, DiffPolynomial)> {
    riccati_coefficients(max_order)
        .iter()
        .enumerate()
        .map(|(i, a)| (i + 1, a.reduce_total_derivatives()))
        .filter(|(_, p)| !p.is_zero())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{riccati_coefficients, wkb_integrands, DiffPolynomial};

    #[test]
    fn recursion_starts_correctly() {
        let a = riccati_coefficients(3);
        assert_eq!(a[0].coefficient(&[0]), 0.5);
        // a_2 = −q'/4
        assert_eq!(a[1].coefficient(&[1]), -0.25);
        // a_3 = q''/8 − q²/8
        assert_eq!(a[2].coefficient(&[2]), 0.125);
        assert_eq!(a[2].coefficient(&[0, 0]), -0.125);
    }

    #[test]
    fn even_orders_are_total_derivatives() {
        let orders: Vec<usize> = wkb_integrands(10).iter().map(|(k, _)| *k).collect();
        assert_eq!(orders, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn reduced_integrands_match_closed_forms() {
        let integrands = wkb_integrands(9);
        let get = |k: usize| {
            integrands
                .iter()
                .find(|(order, _)| *order == k)
                .map(|(_, p)| p.clone())
                .expect("order present")
        };
        let i5 = get(5);
        assert!((i5.coefficient(&[0, 0, 0]) - 1.0 / 16.0).abs() < 1e-15);
        assert!((i5.coefficient(&[1, 1]) - 1.0 / 32.0).abs() < 1e-15);
        let i7 = get(7);
        assert!((i7.coefficient(&[0, 0, 0, 0]) + 5.0 / 128.0).abs() < 1e-15);
        assert!((i7.coefficient(&[0, 1, 1]) + 5.0 / 64.0).abs() < 1e-15);
        assert!((i7.coefficient(&[2, 2]) + 1.0 / 128.0).abs() < 1e-15);
        let i9 = get(9);
        assert!((i9.coefficient(&[0, 0, 0, 0, 0]) - 7.0 / 256.0).abs() < 1e-15);
        assert!((i9.coefficient(&[0, 0, 1, 1]) - 35.0 / 256.0).abs() < 1e-14);
        assert!((i9.coefficient(&[0, 2, 2]) - 7.0 / 256.0).abs() < 1e-14);
        assert!((i9.coefficient(&[3, 3]) - 1.0 / 512.0).abs() < 1e-15);
        assert_eq!(i9.terms().count(), 4);
        assert_eq!(i9.max_order(), 3);
    }

    #[test]
    fn cubic_top_order_reduces_to_first_derivatives() {
        // ∫ q² q''' = −∫ 2 q q' q'' = ∫ (q')³
        let reduced = DiffPolynomial::monomial(&[0, 0, 3], 1.0).reduce_total_derivatives();
        assert_eq!(reduced.terms().count(), 1);
        assert!((reduced.coefficient(&[1, 1, 1]) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn derivative_of_product() {
        let p = DiffPolynomial::monomial(&[0, 1], 2.0);
        let d = p.derivative();
        assert_eq!(d.coefficient(&[1, 1]), 2.0);
        assert_eq!(d.coefficient(&[0, 2]), 2.0);
    }
}
