/*
 *  lib.rs
 *
 *  wallboard - worth a glance
 *  (c) 2020-26 Stuart Hunter
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

//! Data core of an always-on wall display: scheduled widget fetches,
//! a self-renewing photo credential and a rotating photo collage.

pub mod board;
pub mod config;
pub mod credential;
pub mod error;
pub mod http;
pub mod resource;
pub mod rotation;
pub mod timebase;
pub mod widgets;

pub use board::{Board, BoardSnapshot};
pub use credential::{AuthState, CredentialManager};
pub use error::{AuthError, ErrorKind, FetchError};
pub use resource::{FetchState, FetchStatus, Fetcher, RefreshPolicy, RefreshableResource};
pub use rotation::{CollectionWindow, RotatingWindow};
