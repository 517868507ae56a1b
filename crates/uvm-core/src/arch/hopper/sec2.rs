//! `HOPPER_SEC2_WORK_LAUNCH_A`: the secure copy engine used to move encrypted data into
//! protected video memory when confidential computing is on.

use uvm_hwref::sec2;

use crate::error::UvmError;
use crate::hal::{MethodContext, Sec2Hal};
use crate::push::{Push, PushFlags};

/// Decrypt buffers and auth tags must sit on this boundary.
const BUF_ALIGNMENT: u64 = 16;

pub(crate) fn sec2() -> Sec2Hal {
    Sec2Hal {
        init,
        method_is_valid,
        semaphore_release,
        decrypt,
    }
}

fn init(push: &mut Push) {
    if let Some(class) = push.gpu().info.sec2_class {
        push.sec2(sec2::SET_OBJECT, &[class]);
    }
}

/// User channels never reach SEC2. Kernel channels of a confidential-computing device may only
/// push the methods the driver itself emits.
fn method_is_valid(ctx: &MethodContext, address: u32, _value: u32) -> bool {
    if !ctx.privileged {
        return false;
    }
    if !ctx.confidential_computing {
        return true;
    }
    matches!(
        address,
        sec2::EXECUTE
            | sec2::DECRYPT_COPY_SRC_ADDR_HI..=sec2::DECRYPT_COPY_AUTH_TAG_ADDR_LO
            | sec2::METHOD_STREAM_AUTH_TAG_ADDR_HI
            | sec2::METHOD_STREAM_AUTH_TAG_ADDR_LO
            | sec2::SET_SEMAPHORE_A..=sec2::SET_SEMAPHORE_PAYLOAD_UPPER
    )
}

/// `EXECUTE` value for the pending membar flags, consuming them. SEC2 has no GPU-scope flush.
fn execute_flush(push: &mut Push) -> u32 {
    let none = push.get_and_reset_flag(PushFlags::NEXT_MEMBAR_NONE);
    push.get_and_reset_flag(PushFlags::NEXT_MEMBAR_GPU);
    sec2::EXECUTE_FLUSH_DISABLE.value32(u32::from(none))
}

fn semaphore_release(push: &mut Push, va: u64, payload: u32) {
    let flush = execute_flush(push);
    push.sec2(
        sec2::SET_SEMAPHORE_A,
        &[
            sec2::SET_SEMAPHORE_A_UPPER.value32((va >> 32) as u32),
            va as u32,
            payload,
        ],
    );
    push.sec2(
        sec2::EXECUTE,
        &[sec2::EXECUTE_NOTIFY.value32(1) | sec2::EXECUTE_PAYLOAD_VALID.value32(1) | flush],
    );
}

fn decrypt(push: &mut Push, dst: u64, src: u64, size: u32, auth_tag_va: u64) {
    let misaligned = [
        ("source", src),
        ("destination", dst),
        ("size", u64::from(size)),
        ("auth tag", auth_tag_va),
    ]
    .into_iter()
    .find(|(_, value)| value % BUF_ALIGNMENT != 0);
    if let Some((what, value)) = misaligned {
        push.fail(UvmError::assertion(format!(
            "SEC2 decrypt {what} {value:#x} is not {BUF_ALIGNMENT}-byte aligned"
        )));
        return;
    }
    let flush = execute_flush(push);
    push.sec2(
        sec2::DECRYPT_COPY_SRC_ADDR_HI,
        &[
            (src >> 32) as u32,
            src as u32,
            (dst >> 32) as u32,
            dst as u32,
            size,
            (auth_tag_va >> 32) as u32,
            auth_tag_va as u32,
        ],
    );
    push.sec2(sec2::EXECUTE, &[flush]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch;
    use crate::push::ChannelConfig;
    use pretty_assertions::assert_eq;
    use uvm_hwref::class::{ARCH_GH100, HOPPER_SEC2_WORK_LAUNCH_A, SUBCHANNEL_SEC2};

    fn sec2_writes(build: impl Fn(&mut Push)) -> crate::error::Result<Vec<(u32, u32)>> {
        let gpu = arch::test_gpu(ARCH_GH100);
        let mut push = Push::begin(gpu, &ChannelConfig::kernel("sec2", 0x8000));
        build(&mut push);
        Ok(push
            .end()?
            .methods()?
            .iter()
            .filter(|m| m.subchannel == SUBCHANNEL_SEC2)
            .flat_map(|m| m.writes().collect::<Vec<_>>())
            .collect())
    }

    #[test]
    fn init_binds_the_work_launch_class() {
        let writes = sec2_writes(init).unwrap();
        assert_eq!(writes, vec![(sec2::SET_OBJECT, HOPPER_SEC2_WORK_LAUNCH_A)]);
    }

    #[test]
    fn decrypt_programs_all_seven_words_then_executes() {
        let writes =
            sec2_writes(|push| decrypt(push, 0x2_0000_1000, 0x3_0000_2000, 0x800, 0x4_0000_0010)).unwrap();
        assert_eq!(
            writes,
            vec![
                (sec2::DECRYPT_COPY_SRC_ADDR_HI, 3),
                (sec2::DECRYPT_COPY_SRC_ADDR_LO, 0x2000),
                (sec2::DECRYPT_COPY_DST_ADDR_HI, 2),
                (sec2::DECRYPT_COPY_DST_ADDR_LO, 0x1000),
                (sec2::DECRYPT_COPY_SIZE, 0x800),
                (sec2::DECRYPT_COPY_AUTH_TAG_ADDR_HI, 4),
                (sec2::DECRYPT_COPY_AUTH_TAG_ADDR_LO, 0x10),
                (sec2::EXECUTE, 0),
            ]
        );
    }

    #[test]
    fn misaligned_decrypt_fails_the_push() {
        assert!(sec2_writes(|push| decrypt(push, 0x1000, 0x2000, 0x800, 0x4_0000_0008)).is_err());
        assert!(sec2_writes(|push| decrypt(push, 0x1000, 0x2004, 0x800, 0x10)).is_err());
    }

    #[test]
    fn semaphore_release_notifies_and_honours_membar_none() {
        let writes = sec2_writes(|push| {
            push.set_flag(PushFlags::NEXT_MEMBAR_NONE);
            semaphore_release(push, 0x1_0000_0100, 7);
        })
        .unwrap();
        let execute = writes.iter().find(|(a, _)| *a == sec2::EXECUTE).unwrap().1;
        assert_eq!(execute, 0b111);
        assert_eq!(
            &writes[..3],
            &[
                (sec2::SET_SEMAPHORE_A, 1),
                (sec2::SET_SEMAPHORE_B, 0x100),
                (sec2::SET_SEMAPHORE_PAYLOAD_LOWER, 7),
            ]
        );
    }

    #[test]
    fn confidential_kernel_channels_get_the_allowlist() {
        let cc = MethodContext {
            privileged: true,
            confidential_computing: true,
            ..MethodContext::default()
        };
        assert!(method_is_valid(&cc, sec2::DECRYPT_COPY_SIZE, 0));
        assert!(method_is_valid(&cc, sec2::SET_SEMAPHORE_PAYLOAD_UPPER, 0));
        assert!(!method_is_valid(&cc, 0x500, 0));
        assert!(!method_is_valid(&MethodContext::default(), sec2::EXECUTE, 0));
        let kernel = MethodContext {
            privileged: true,
            ..MethodContext::default()
        };
        assert!(method_is_valid(&kernel, 0x500, 0));
    }
}
