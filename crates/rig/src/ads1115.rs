//! ADS1115 16-bit ADC over I2C, used for the soil moisture probe and the pH
//! probe.
//!
//! Single-shot conversions at PGA ±4.096 V and 128 SPS. With probes powered
//! from 3.3 V that puts the useful range at roughly 0..26400 counts.

use anyhow::{ensure, Context, Result};
use rppal::i2c::I2c;
use std::{thread, time::Duration};

use crate::config::ADS1115_MAX_CHANNEL;

// ── Registers ───────────────────────────────────────────────────────────────

const REG_CONVERSION: u8 = 0x00;
const REG_CONFIG: u8 = 0x01;

// ── Config register ─────────────────────────────────────────────────────────
//
//   [15]    OS        1 = start single-shot conversion / 1 on read = idle
//   [14:12] MUX       input selection
//   [11:9]  PGA       gain
//   [8]     MODE      1 = single-shot
//   [7:5]   DR        data rate
//   [1:0]   COMP_QUE  11 = comparator off

/// OS=1, PGA=001 (±4.096 V), MODE=1, DR=100 (128 SPS), COMP_QUE=11.
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

const MUX_SHIFT: u8 = 12;

/// AINx vs GND for x in 0..=3.
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

/// One conversion at 128 SPS takes ~7.8 ms.
const CONVERSION_WAIT: Duration = Duration::from_millis(9);

const OS_READY_BIT: u16 = 1 << 15;

fn config_for_channel(channel: usize) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[channel] << MUX_SHIFT)
}

pub struct Ads1115 {
    i2c: I2c,
}

impl Ads1115 {
    pub fn new(addr: u16) -> Result<Self> {
        let mut i2c = I2c::new().context("ads1115: failed to open i2c bus")?;
        i2c.set_slave_address(addr)
            .with_context(|| format!("ads1115: bad address 0x{addr:02x}"))?;

        tracing::info!(addr = format_args!("0x{addr:02x}"), "ads1115 initialised");
        Ok(Self { i2c })
    }

    /// Single-shot read of `channel`, clamped to the non-negative
    /// single-ended range.
    pub fn read_channel(&mut self, channel: usize) -> Result<i16> {
        ensure!(
            channel <= ADS1115_MAX_CHANNEL,
            "ads1115 channel {channel} out of range (0–{ADS1115_MAX_CHANNEL})"
        );

        self.i2c
            .block_write(REG_CONFIG, &config_for_channel(channel).to_be_bytes())
            .with_context(|| format!("ads1115: start conversion on AIN{channel}"))?;
        thread::sleep(CONVERSION_WAIT);

        let mut ready = false;
        for _ in 0..3 {
            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONFIG, &mut buf)?;
            if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                ready = true;
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        ensure!(ready, "ads1115: conversion on AIN{channel} never completed");

        let mut buf = [0u8; 2];
        self.i2c.block_read(REG_CONVERSION, &mut buf)?;
        Ok(i16::from_be_bytes(buf).max(0))
    }
}
