/*
 *  rotation.rs
 *
 *  wallboard - worth a glance
 *	(c) 2020-26 Stuart Hunter
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
use serde::Serialize;

/// The visible slice of a rotating collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionWindow<T> {
    pub items: Vec<T>,
    pub start_index: usize,
    pub window_size: usize,
}

impl<T> Default for CollectionWindow<T> {
    fn default() -> Self {
        Self { items: Vec::new(), start_index: 0, window_size: 0 }
    }
}

/// Sliding window over an ordered collection that wraps back to the start
/// instead of running past the end.
#[derive(Debug, Clone)]
pub struct RotatingWindow<T> {
    items: Vec<T>,
    start_index: usize,
    window_size: usize,
}

impl<T: Clone> RotatingWindow<T> {
    pub fn new(window_size: usize) -> Self {
        Self { items: Vec::new(), start_index: 0, window_size: window_size.max(1) }
    }

    /// Number of distinct window positions.
    fn cycle_len(&self) -> usize {
        (self.items.len() + 1).saturating_sub(self.window_size).max(1)
    }

    pub fn set_items(&mut self, items: Vec<T>) {
        self.items = items;
        if self.start_index >= self.cycle_len() {
            self.start_index = 0;
        }
    }

    pub fn tick(&mut self) {
        if self.items.len() < self.window_size {
            return;
        }
        self.start_index = (self.start_index + 1) % self.cycle_len();
    }

    pub fn start_index(&self) -> usize {
        self.start_index
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn current_window(&self) -> CollectionWindow<T> {
        let end = (self.start_index + self.window_size).min(self.items.len());
        let items = self.items.get(self.start_index..end).map(<[T]>::to_vec).unwrap_or_default();
        CollectionWindow { window_size: items.len(), items, start_index: self.start_index }
    }
}
