//! Polar kinematics helpers.

use std::f64::consts::PI;

use crate::jagged::Jagged;
use crate::error::{Error, Result};

/// Objects with a (pt, eta, phi, mass) four-vector.
pub trait Kinematics {
    /// Transverse momentum.
    fn pt(&self) -> f64;
    /// Pseudorapidity.
    fn eta(&self) -> f64;
    /// Azimuth.
    fn phi(&self) -> f64;
    /// Invariant mass.
    fn mass(&self) -> f64;

    /// x component of the transverse momentum.
    fn px(&self) -> f64 {
        self.pt() * self.phi().cos()
    }

    /// y component of the transverse momentum.
    fn py(&self) -> f64 {
        self.pt() * self.phi().sin()
    }

    /// Energy of the four-vector.
    fn energy(&self) -> f64 {
        energy(self.pt(), self.eta(), self.mass())
    }
}

/// Azimuthal difference wrapped to `[-pi, pi)`.
pub fn delta_phi(phi1: f64, phi2: f64) -> f64 {
    let mut d = (phi1 - phi2) % (2.0 * PI);
    if d >= PI {
        d -= 2.0 * PI;
    } else if d < -PI {
        d += 2.0 * PI;
    }
    d
}

/// Angular distance in the (eta, phi) plane.
pub fn delta_r(eta1: f64, phi1: f64, eta2: f64, phi2: f64) -> f64 {
    let deta = eta1 - eta2;
    let dphi = delta_phi(phi1, phi2);
    deta.hypot(dphi)
}

/// Energy from pt, eta and mass.
pub fn energy(pt: f64, eta: f64, mass: f64) -> f64 {
    let p = pt * eta.cosh();
    (p * p + mass * mass).sqrt()
}

/// Per-object flag: true when no object of `others` in the same event lies
/// within `min_dr`.
pub fn isolated_from<A: Kinematics, B: Kinematics>(
    objects: &Jagged<A>,
    others: &Jagged<B>,
    min_dr: f64,
) -> Result<Vec<bool>> {
    if objects.n_events() != others.n_events() {
        return Err(Error::Validation(format!(
            "cannot cross-clean collections with {} and {} events",
            objects.n_events(),
            others.n_events()
        )));
    }
    let mut out = Vec::with_capacity(objects.len());
    for (evo, evx) in objects.iter_events().zip(others.iter_events()) {
        for o in evo {
            let clean = evx.iter().all(|x| delta_r(o.eta(), o.phi(), x.eta(), x.phi()) > min_dr);
            out.push(clean);
        }
    }
    Ok(out)
}
