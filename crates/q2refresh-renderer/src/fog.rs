// Copyright (C) 1997-2001 Id Software, Inc.
// GPL-2.0-or-later
//
// gl3_fog.c -> fog.rs
// Exponential fog and its timed transitions

use std::fmt::Write;

use q2refresh_common::cmd::CmdArgs;
use q2refresh_common::q_shared::atof;

/// Parameters before a level sets its own.
pub const DEFAULT_FOG: [f32; 4] = [0.3, 0.3, 0.3, 0.0];

/// Fog as (r, g, b, density), blending from `old` to `params` over
/// `lerp_time` seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Fog {
    params: [f32; 4],
    old: [f32; 4],
    lerp_time: f32,
    lerp_timer: f32,
    last_time: f32,
}

impl Default for Fog {
    fn default() -> Self {
        let [r, g, b, d] = DEFAULT_FOG;
        let mut fog = Self { params: [0.0; 4], old: [0.0; 4], lerp_time: 0.0, lerp_timer: 0.0, last_time: 0.0 };
        fog.set(r, g, b, d);
        fog
    }
}

impl Fog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target parameters, ignoring any transition in progress.
    pub fn params(&self) -> [f32; 4] {
        self.params
    }

    /// Jumps to (r, g, b, density) without a transition.
    pub fn set(&mut self, r: f32, g: f32, b: f32, density: f32) {
        self.params = [r, g, b, density];
        self.old = self.params;
        self.lerp_time = 0.0;
        self.lerp_timer = 0.0;
    }

    fn print(&self, out: &mut String) {
        let [r, g, b, d] = self.params;
        let _ = writeln!(out, "density = {:.6}\nred = {:.6}\ngreen = {:.6}\nblue = {:.6}", d, r, g, b);
    }

    /// `fog <density> [<red> <green> <blue>]`
    pub fn command(&mut self, args: &CmdArgs, out: &mut String) {
        match args.argc() {
            2 => {
                let d = atof(args.argv(1));
                self.params[3] = d;
                self.old[3] = d;
            }
            5 => {
                let d = atof(args.argv(1));
                let [r, g, b] = [2, 3, 4].map(|i| atof(args.argv(i)));
                self.params = [r, g, b, d];
                self.old = self.params;
            }
            _ => {
                out.push_str("usage: fog <density> <red> <green> <blue>\n");
                out.push_str("       fog <density>\n");
            }
        }
        self.print(out);
    }

    /// `foglerp <time> <density> [<red> <green> <blue>]`, started at
    /// refdef time `now`.
    pub fn lerp_command(&mut self, args: &CmdArgs, now: f32, out: &mut String) {
        let previous = self.params;
        let time = match args.argc() {
            3 => {
                self.params[3] = atof(args.argv(2));
                atof(args.argv(1))
            }
            6 => {
                let d = atof(args.argv(2));
                let [r, g, b] = [3, 4, 5].map(|i| atof(args.argv(i)));
                self.params = [r, g, b, d];
                atof(args.argv(1))
            }
            _ => {
                out.push_str("usage: foglerp <time> <density> <red> <green> <blue>\n");
                out.push_str("       foglerp <time> <density>\n");
                return;
            }
        };
        self.old = previous;
        self.last_time = now;
        self.lerp_time = time;
        self.lerp_timer = time;
    }

    /// Parameters for the frame at refdef time `now`, advancing the transition.
    pub fn setup_frame(&mut self, now: f32) -> [f32; 4] {
        let fraction = if self.lerp_time > 0.0 { 1.0 - self.lerp_timer / self.lerp_time } else { 1.0 };
        let frame: [f32; 4] = std::array::from_fn(|i| self.old[i] + (self.params[i] - self.old[i]) * fraction);

        if self.lerp_timer > 0.0 {
            self.lerp_timer -= now - self.last_time;
        }
        if self.lerp_timer <= 0.0 {
            self.lerp_timer = 0.0;
        }
        self.last_time = now;

        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: [f32; 4], b: [f32; 4]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn test_density_only_keeps_color() {
        let mut fog = Fog::new();
        let mut out = String::new();
        fog.command(&CmdArgs::tokenize("fog 0.01"), &mut out);
        assert!(close(fog.params(), [0.3, 0.3, 0.3, 0.01]));
        assert!(close(fog.setup_frame(0.0), [0.3, 0.3, 0.3, 0.01]));
        assert_eq!(out, "density = 0.010000\nred = 0.300000\ngreen = 0.300000\nblue = 0.300000\n");
    }

    #[test]
    fn test_full_form_and_usage() {
        let mut fog = Fog::new();
        let mut out = String::new();
        fog.command(&CmdArgs::tokenize("fog 0.002 0.5 0.25 1"), &mut out);
        assert!(close(fog.params(), [0.5, 0.25, 1.0, 0.002]));

        out.clear();
        fog.command(&CmdArgs::tokenize("fog 1 2"), &mut out);
        assert!(out.starts_with("usage: fog"));
        assert!(out.ends_with("blue = 1.000000\n"));
        assert!(close(fog.params(), [0.5, 0.25, 1.0, 0.002]));
    }

    #[test]
    fn test_lerp_interpolates_over_time() {
        let mut fog = Fog::new();
        fog.set(0.0, 0.0, 0.0, 0.0);
        let mut out = String::new();
        fog.lerp_command(&CmdArgs::tokenize("foglerp 2 0.04 1 1 1"), 10.0, &mut out);
        assert!(out.is_empty());

        assert!(close(fog.setup_frame(10.0), [0.0; 4]));
        assert!(close(fog.setup_frame(11.0), [0.0; 4]));
        // timer was cut by the first elapsed second
        assert!(close(fog.setup_frame(11.5), [0.5, 0.5, 0.5, 0.02]));
        assert!(close(fog.setup_frame(12.0), [0.75, 0.75, 0.75, 0.03]));
        assert!(close(fog.setup_frame(13.0), [1.0, 1.0, 1.0, 0.04]));
        assert!(close(fog.setup_frame(20.0), [1.0, 1.0, 1.0, 0.04]));
    }

    #[test]
    fn test_lerp_density_only_and_bad_args() {
        let mut fog = Fog::new();
        let mut out = String::new();
        fog.lerp_command(&CmdArgs::tokenize("foglerp 1"), 0.0, &mut out);
        assert!(out.starts_with("usage: foglerp"));
        assert!(close(fog.setup_frame(0.0), DEFAULT_FOG));

        out.clear();
        fog.lerp_command(&CmdArgs::tokenize("foglerp 1 0.5"), 0.0, &mut out);
        assert!(close(fog.params(), [0.3, 0.3, 0.3, 0.5]));
        fog.setup_frame(0.0);
        fog.setup_frame(0.5);
        assert!(close(fog.setup_frame(0.5), [0.3, 0.3, 0.3, 0.25]));
    }
}
