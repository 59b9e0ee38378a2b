// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A minimal hand-rolled bitflags macro for the handful of single-byte flag
//! sets used by publications, MD sessions, and socket slots.
//!
//! The crate does not depend on the `bitflags` crate: each flag set here is
//! five bits or fewer, and a few lines of macro beat a generic-purpose
//! dependency for that — the same call the teacher makes with its own
//! hand-rolled flag enums (e.g. `xtypes::type_kind::StructTypeFlag`).

/// Define a `Copy` flag-set newtype over `u8` with `contains`/`with`/`set`/
/// `clear` helpers and `BitOr`.
#[macro_export]
macro_rules! bitflags_u8 {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                const $flag:ident = $value:expr;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name(u8);

        impl $name {
            $(
                $(#[$fmeta])*
                pub const $flag: Self = Self($value);
            )*

            /// Empty flag set.
            pub const NONE: Self = Self(0);

            #[must_use]
            pub fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            #[must_use]
            pub fn with(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            pub fn set(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn clear(&mut self, other: Self) {
                self.0 &= !other.0;
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                self.with(rhs)
            }
        }
    };
}
