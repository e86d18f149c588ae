/// Diagnostic: identity vs analytic position Jacobian with a lever-arm antenna
///
/// The antenna sits 0.3 m ahead of the reference point. A heading error then
/// shows up as a lateral antenna error, which only the analytic H can
/// attribute to θ. The identity H has to wait for motion to expose it.
use pose_ekf::types::{angle_diff, PositionNoise, StateMat, StateVec};
use pose_ekf::{
    AntennaOffset, Control, ExtendedKalmanFilter, JacobianMode, MeasurementModel,
    PositionMeasurementModel, State, SystemModel, UnicycleModel,
};

const STEPS: usize = 300;

fn run(mode: JacobianMode) -> anyhow::Result<Vec<(f64, f64)>> {
    let model = UnicycleModel::new(
        0.1,
        StateMat::from_diagonal(&StateVec::new(1e-3, 1e-3, 5e-4)),
    )?;
    let sensor =
        PositionMeasurementModel::new(AntennaOffset::new(0.3, 0.0), PositionNoise::identity() * 1e-4)?
            .with_jacobian_mode(mode);

    let p0 = StateMat::from_diagonal(&StateVec::new(0.1, 0.1, 0.5));
    let mut ekf: ExtendedKalmanFilter<_> =
        ExtendedKalmanFilter::new(model.clone(), State::new(0.0, 0.0, 0.6), &p0)?;

    let mut truth = State::default();
    let mut errors = Vec::with_capacity(STEPS);

    for k in 0..STEPS {
        // Creep forward, then hold still for a while, then drive a slow arc
        let u = match k {
            0..=49 => Control::new(0.2, 0.0),
            50..=99 => Control::new(0.0, 0.0),
            _ => Control::new(0.8, 0.15),
        };
        truth = model.f(&truth, &u);
        ekf.predict(&u)?;
        ekf.update(&sensor, sensor.h(&truth))?;

        let est = ekf.state();
        let pos_err = ((est.x() - truth.x()).powi(2) + (est.y() - truth.y()).powi(2)).sqrt();
        let heading_err = angle_diff(est.theta(), truth.theta()).abs();
        errors.push((pos_err, heading_err));
    }

    Ok(errors)
}

fn main() -> anyhow::Result<()> {
    println!("=== Antenna Lever-Arm Jacobian Demo ===\n");
    println!("Antenna offset: 0.30 m forward | initial heading error: 0.60 rad\n");

    let identity = run(JacobianMode::Identity)?;
    let analytic = run(JacobianMode::Analytic)?;

    println!("{:>6} | {:>22} | {:>22}", "step", "identity H (pos, θ)", "analytic H (pos, θ)");
    println!("{}", "-".repeat(58));
    for k in [0, 10, 25, 49, 75, 99, 150, 200, STEPS - 1] {
        let (ip, ih) = identity[k];
        let (ap, ah) = analytic[k];
        println!(
            "{:>6} | {:>9.4} m {:>7.4} rad | {:>9.4} m {:>7.4} rad",
            k + 1,
            ip,
            ih,
            ap,
            ah
        );
    }

    let settle = |errs: &[(f64, f64)]| errs.iter().position(|&(_, h)| h < 0.05);
    println!("\n=== KEY INSIGHT ===");
    match (settle(&identity), settle(&analytic)) {
        (Some(i), Some(a)) => println!(
            "Heading within 0.05 rad after {} steps (identity) vs {} steps (analytic).",
            i + 1,
            a + 1
        ),
        (None, Some(a)) => println!(
            "Identity H never settled the heading; analytic H did after {} steps.",
            a + 1
        ),
        (i, a) => println!("Heading settle steps: identity {:?}, analytic {:?}", i, a),
    }
    println!("While the robot stands still only the lever arm makes heading observable.");

    Ok(())
}
